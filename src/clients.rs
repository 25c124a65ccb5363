pub(crate) mod imagery;

pub(crate) use imagery::{
    DailyMetricsRequest, DailyVerdict, ImageryPipeline, ImageryPipelineClient,
    ImageryPipelineConfig, PipelineError,
};
