//! Entity managers: one cache plus resolution protocol per kind, and the
//! marker location manager on top of them.

pub mod base;
pub mod marker_locations;
pub mod markers;
pub mod session;
pub mod streams;

use crate::errors::SyncResult;
use crate::models::{Codemark, Criteria, User};

pub use base::ManagerBase;
pub use marker_locations::MarkerLocationManager;
pub use markers::MarkersManager;
pub use session::{Managers, Resettable, SessionContext, Sources};
pub use streams::StreamsManager;

pub type CodemarksManager = ManagerBase<Codemark>;
pub type UsersManager = ManagerBase<User>;

impl ManagerBase<Codemark> {
    /// Cached codemarks attached to a stream.
    pub fn for_stream(&self, stream_id: &str) -> SyncResult<Vec<Codemark>> {
        self.cache().get_group(&Criteria::new([("streamId", stream_id)]))
    }
}

impl ManagerBase<User> {
    /// Cache-only lookup; usernames are not a server fetch key.
    pub fn get_by_username(&self, username: &str) -> SyncResult<Option<User>> {
        self.get_cached(&Criteria::new([("username", username)]))
    }
}
