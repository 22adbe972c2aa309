//! Room allocation for claimed pairs

pub mod allocator;

pub use allocator::{
    PublisherHandoff, RecordingRoomHandoff, RoomAllocator, RoomAssignment, RoomHandoff, RoomSeat,
};
