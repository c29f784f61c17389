//! # Frame streaming over UDP
//!
//! One producer streams encoded frames to one consumer at a time over a
//! single datagram socket.
//!
//! ```text
//! PRODUCER                                     CONSUMER
//! ┌─────────────────────────┐                ┌──────────────────────┐
//! │ FrameSource             │  "connect"     │ ConnectionManager    │
//! │   ↓                     │ ◄────────────  │   ::connect          │
//! │ ConnectionManager       │  "w,h,fps,q"   │                      │
//! │   ::listen/poll_control │ ────────────►  │ FrameReceiver        │
//! │   ↓                     │  meta+chunks   │   ↓                  │
//! │ FrameTransmitter        │ ────────────►  │ FrameDecoder         │
//! │                         │  "TERMINATE"   │   ↓                  │
//! │                         │ ────────────►  │ FrameSlot → render   │
//! └─────────────────────────┘                └──────────────────────┘
//! ```
//!
//! ## Sub-modules
//!
//! | Module        | Purpose                                           |
//! |---------------|---------------------------------------------------|
//! | `types`       | Collaborator traits and the single-slot frame cell |
//! | `handshake`   | Control tokens and the session config string      |
//! | `metadata`    | 14-byte frame header and reassembly validation    |
//! | `connection`  | Handshake, hand-off and retry on the session socket |
//! | `transmitter` | Chunked sending with adaptive packet size         |
//! | `receiver`    | Reassembly loop and frame delivery                |
//! | `stats`       | Shared frame counters                             |
//! | `session`     | Producer / consumer orchestration                 |

pub mod connection;
pub mod handshake;
pub mod metadata;
pub mod receiver;
pub mod session;
pub mod stats;
pub mod transmitter;
pub mod types;

pub use connection::{ConnectionManager, ControlEvent, RetryPolicy, Session};
pub use handshake::{Resolution, SessionConfig};
pub use metadata::{FrameMetadata, Reassembly};
pub use receiver::{FrameReceiver, ReceiveOutcome, ReceiverConfig};
pub use session::{
    ConsumerConfig, ConsumerSession, DEFAULT_PORT, ProducerConfig, ProducerSession, SessionHandle,
};
pub use stats::{StatsAccumulator, StreamStats};
pub use transmitter::{FrameTransmitter, INITIAL_PACKET_SIZE, MIN_PACKET_SIZE, PacketSizer};
pub use types::{
    DecodedFrame, FrameDecoder, FrameReader, FrameSlot, FrameSource, PassthroughDecoder,
};
