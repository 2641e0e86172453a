mod engine;
mod error;
mod gpu;
mod request;

pub use engine::{ContainerRuntime, Engine};
pub use error::RuntimeError;
pub use gpu::{gpu_available, GpuMode};
pub use request::{Bind, ContainerRun};
