//! Server lifecycle notifications

/// Something that happened to the set of connected peers
///
/// Published on a broadcast channel; see
/// [`IndiServer::subscribe`](crate::IndiServer::subscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected { label: String },
    ClientDisconnected { label: String },
    DeviceLoaded { identifier: String },
    /// A backend was removed together with every device name it served
    DeviceRemoved {
        identifier: String,
        names: Vec<String>,
    },
    /// A backend withdrew one of its devices with a whole-device
    /// `delProperty`
    DeviceWithdrawn { name: String },
}
