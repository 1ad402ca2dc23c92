pub mod registry;
pub mod transport;

pub use registry::{Agent, AgentRegistry, STAGE_COUNT};
pub use transport::{AgentTransport, ChunkStream, HttpTransport};
