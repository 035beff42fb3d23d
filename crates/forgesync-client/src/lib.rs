//! Hub client: call descriptors, promise handles, multicall batches, the
//! XML-RPC wire codec, and the transport seam (HTTP for real hubs, a
//! scriptable mock for tests).

pub mod call;
pub mod mock;
pub mod multicall;
pub mod transport;
pub mod xmlrpc;

pub use call::{CallDescriptor, CallOutcome, Promise};
pub use mock::{HubState, MockHub};
pub use multicall::{HubSession, Multicall};
pub use transport::{HttpTransport, HubTransport};
