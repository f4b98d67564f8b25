//! Job definitions for each pipeline.

#![allow(missing_docs)]

mod client;
mod deliver;
mod inbox;
mod oneshot;
mod webpush;

pub use client::ClientJob;
pub use deliver::DeliverJob;
pub use inbox::InboxJob;
pub use oneshot::OneshotJob;
pub use webpush::WebPushJob;

/// `ActivityPub` activity and object type tags used to route jobs to the
/// correct processing branch.
pub mod ap {
    pub const ACTIVITY_CREATE: &str = "Create";
    pub const ACTIVITY_UPDATE: &str = "Update";
    pub const ACTIVITY_DELETE: &str = "Delete";
    pub const ACTIVITY_FOLLOW: &str = "Follow";
    pub const ACTIVITY_ACCEPT: &str = "Accept";
    pub const ACTIVITY_REJECT: &str = "Reject";
    pub const ACTIVITY_LIKE: &str = "Like";
    pub const ACTIVITY_ANNOUNCE: &str = "Announce";
    pub const ACTIVITY_UNDO: &str = "Undo";

    pub const OBJECT_NOTE: &str = "Note";
    pub const OBJECT_PROFILE: &str = "Profile";
    pub const OBJECT_POLL: &str = "Question";
}
