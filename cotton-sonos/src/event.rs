use crate::device::Device;

/// Something the application should know about, from
/// [`AsyncService::start`](crate::AsyncService::start)
///
/// Registry changes always carry the whole set of devices, never a
/// diff: the application can simply replace its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A device appeared, was refreshed or went away
    RegistryChanged(Vec<Device>),

    /// A device sent an event NOTIFY
    DevicePushedState {
        /// The device, as currently registered
        device: Device,

        /// The event subscription path it concerns, if the SID is known
        service: Option<String>,

        /// The NOTIFY body, unparsed (a UPnP property set)
        payload: String,
    },
}
