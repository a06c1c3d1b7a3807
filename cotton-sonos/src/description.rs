//! Turning a device description document into a [`Device`]

use crate::device::Device;
use crate::error::Error;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::{Duration, SystemTime};
use tracing::debug;
use xmltree::{Element, XMLNode};

/// Port assumed when the description URL names none
pub const DEFAULT_PORT: u16 = 1400;

const UDN: &str = "root/device/UDN";
const DEVICE_TYPE: &str = "root/device/deviceType";
const SPEAKER_SIZE: &str = "root/device/internalSpeakerSize";
const ROOM_NAME: &str = "root/device/roomName";
const ROOT_EVENTS: &str = "root/device/serviceList/service/eventSubURL";
const EMBEDDED_EVENTS: &str =
    "root/device/deviceList/device/serviceList/service/eventSubURL";

const FIELDS: [&str; 6] = [
    UDN,
    DEVICE_TYPE,
    SPEAKER_SIZE,
    ROOM_NAME,
    ROOT_EVENTS,
    EMBEDDED_EVENTS,
];

fn visit(
    element: &Element,
    parent: &str,
    wanted: &[&str],
    out: &mut HashMap<String, Vec<String>>,
) {
    let path = if parent.is_empty() {
        element.name.clone()
    } else {
        format!("{parent}/{}", element.name)
    };

    if wanted.contains(&path.as_str()) {
        if let Some(text) = element.get_text() {
            out.entry(path.clone())
                .or_default()
                .push(text.trim().to_string());
        }
    }

    let prefix = format!("{path}/");
    if !wanted.iter().any(|w| w.starts_with(&prefix)) {
        return;
    }
    for child in &element.children {
        if let XMLNode::Element(e) = child {
            visit(e, &path, wanted, out);
        }
    }
}

/// Pull named fields out of an XML document
///
/// Each path is a list of element names from the document element
/// down, joined with "/", ignoring namespace prefixes: for instance
/// "root/device/roomName". Every element at a path contributes its
/// text, in document order. Paths that match nothing are absent from
/// the result.
///
/// # Errors
///
/// Returns [`Error::Xml`] if the document does not parse.
pub fn extract_fields(
    document: &str,
    paths: &[&str],
) -> Result<HashMap<String, Vec<String>>, Error> {
    let root = Element::parse(document.as_bytes())?;
    let mut out = HashMap::new();
    visit(&root, "", paths, &mut out);
    Ok(out)
}

fn first<'a>(fields: &'a HashMap<String, Vec<String>>, path: &str) -> Option<&'a str> {
    fields
        .get(path)
        .and_then(|v| v.first())
        .map(String::as_str)
        .filter(|s| !s.is_empty())
}

/// Address and port of the device serving `url`
///
/// # Errors
///
/// Returns [`Error::InvalidUrl`] if the URL does not parse or its host
/// is a name rather than an IP address.
pub fn address_of(url: &str) -> Result<(IpAddr, u16), Error> {
    let parsed =
        url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    let ip = match parsed.host() {
        Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip),
        _ => return Err(Error::InvalidUrl(url.to_string())),
    };
    Ok((ip, parsed.port().unwrap_or(DEFAULT_PORT)))
}

fn event_path(url: &str) -> String {
    if url.starts_with('/') {
        url.to_string()
    } else if let Ok(u) = url::Url::parse(url) {
        u.path().to_string()
    } else {
        format!("/{url}")
    }
}

/// Build a [`Device`] from its description document
///
/// `url` is where the document came from; the device's address is
/// taken from it.
///
/// # Errors
///
/// Fails if the document is not XML, has no UDN, or if the URL has no
/// IP address.
pub fn parse(url: &str, document: &str, now: SystemTime) -> Result<Device, Error> {
    let fields = extract_fields(document, &FIELDS)?;
    let udn = first(&fields, UDN).ok_or(Error::MissingField("UDN"))?;
    let id = if udn.starts_with("uuid:") {
        udn.to_string()
    } else {
        format!("uuid:{udn}")
    };
    let (ip, port) = address_of(url)?;

    let can_play_music = first(&fields, SPEAKER_SIZE)
        .and_then(|s| s.parse::<i32>().ok())
        .is_some_and(|n| n > 0);

    let mut services: Vec<String> = Vec::new();
    for path in [ROOT_EVENTS, EMBEDDED_EVENTS] {
        for s in fields.get(path).into_iter().flatten() {
            if s.is_empty() {
                continue;
            }
            let s = event_path(s);
            if !services.contains(&s) {
                services.push(s);
            }
        }
    }

    Ok(Device {
        id,
        ip,
        port,
        info_url: url.to_string(),
        device_type: first(&fields, DEVICE_TYPE).unwrap_or_default().to_string(),
        can_play_music,
        group_name: first(&fields, ROOM_NAME).unwrap_or_default().to_string(),
        services,
        subscriptions: BTreeMap::new(),
        last_updated: now,
    })
}

/// Fetches description documents over HTTP
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    /// Create a fetcher whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be set up.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// GET one description document and parse it
    ///
    /// # Errors
    ///
    /// Any transport failure, non-success status, or parse failure;
    /// no partial device is ever returned.
    pub async fn fetch(&self, url: &str) -> Result<Device, Error> {
        debug!(%url, "fetching description");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status(status.as_u16()));
        }
        let text = response.text().await?;
        parse(url, &text, SystemTime::now())
    }
}
