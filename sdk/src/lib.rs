// Intent messenger SDK - main library exports
pub mod transport;
pub mod envelope;
pub mod channels;
pub mod listener;
pub mod mock_transport;

// Flattened re-exports
pub use self::transport::{Attachments, Receiver, Transport};
pub use self::envelope::{CorrelationId, Envelope, Kind};
pub use self::channels::{BusIdentity, ChannelSet};
pub use self::listener::{Listener, ReplyChannel, ResponseAction, ResponseHandler};
