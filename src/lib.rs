pub mod auth;
pub mod codec;
pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod frame;
pub mod handler;
pub mod heartbeat;
pub mod parser;
pub mod registry;
pub mod server;
pub mod session;
pub mod subscription;
pub mod transaction;

pub use auth::{AuthenticationProvider, StaticCredentials};
pub use codec::{StompCodec, StompItem};
pub use config::ServerOptions;
pub use connection::{CloseReason, ConnectionState, FrameWriter, Outbound, ServerConnection};
pub use destination::{
    DefaultDestinationFactory, Destination, DestinationFactory, DestinationKind, Queue, Topic,
};
pub use error::{Result, StompError};
pub use frame::{Command, Frame};
pub use handler::ServerHandler;
pub use heartbeat::{Heartbeat, NegotiatedHeartbeat, negotiate_heartbeats, parse_heartbeat_header};
pub use parser::FrameLimits;
pub use registry::DestinationRegistry;
pub use server::StompServer;
pub use session::{serve, serve_with_shutdown};
pub use subscription::{AckMode, Acknowledgement, Subscription};
pub use transaction::Transactions;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_frame_display() {
        let f = Frame::new(Command::Connected)
            .header("version", "1.2")
            .set_body(b"hello".to_vec());
        let s = format!("{}", f);
        assert!(s.contains("CONNECTED"));
        assert!(s.contains("Body (5 bytes)"));
    }
}
