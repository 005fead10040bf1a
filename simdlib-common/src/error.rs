use dyn_stack::SizeOverflow;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    #[error("buffer `{name}` too small: {actual} elements, {required} required")]
    BufferTooSmall {
        name: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("weights and quantization parameters were not set")]
    ParamsNotSet,

    #[error("no winograd variant for a {kernel_y}x{kernel_x} kernel")]
    UnsupportedVariant { kernel_y: usize, kernel_x: usize },

    #[error("scratch buffer size overflow")]
    SizeOverflow,
}

impl From<SizeOverflow> for Error {
    fn from(_: SizeOverflow) -> Self {
        Error::SizeOverflow
    }
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
