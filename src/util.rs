pub(crate) mod dates;
pub(crate) mod region;
pub(crate) mod retry;
