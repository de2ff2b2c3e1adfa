pub mod archive;
pub mod hilow;
pub mod loop2_packet;
pub mod loop_packet;

pub use archive::ArchiveRecord;
pub use hilow::HiLowPacket;
pub use loop2_packet::Loop2Packet;
pub use loop_packet::LoopPacket;
