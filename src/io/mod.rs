// Purpose - device plumbing: the output stream and live capture

pub mod input;
pub mod output;

pub use input::CpalInputProvider;
pub use output::{default_output_sample_rate, OutputDriver};
