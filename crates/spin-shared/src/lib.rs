//! Wire-level building blocks shared by the spin session engine: protocol
//! constants, the command encoder and field splitter, the ISO-8859-15 codec
//! and the small value types carried in events.

pub mod charset;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use charset::{decode_from_wire, encode_for_wire, Latin9, WireCodec};
pub use error::{CodecError, FrameError};
pub use protocol::{split_fields, split_list, Command, InboundOp, LeaveContext, OutboundOp};
pub use types::{
    meify, normalize, AwayReplyPolicy, MemberFlags, MessageKind, Presence, UserStatus,
};
