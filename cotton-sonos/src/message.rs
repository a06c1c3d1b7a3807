use crate::config::DiscoveryOptions;
use crate::headers::{Headers, StartLine};
use crate::udp::SSDP_GROUP;

/// The kind of a NOTIFY, with the data particular to each kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    /// ssdp:alive, the device is (still) present
    Alive {
        /// Seconds for which this advertisement remains valid
        keep_alive: u32,
        /// SERVER header
        user_agent: Option<String>,
    },

    /// ssdp:update, the device's capabilities changed
    Update {
        /// The boot id the device will use from now on
        next_boot_id: u32,
    },

    /// ssdp:byebye, the device is leaving
    Goodbye,
}

/// A unicast answer to our M-SEARCH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryResponse {
    /// USN header
    pub unique_service_name: String,
    /// Device identity, the part of the USN before "::"
    pub id: String,
    /// Description document URL
    pub location: String,
    /// ST header
    pub target_scope: Option<String>,
    /// X-RINCON-BOOTSEQ header
    pub boot_id: u32,
    /// X-RINCON-HOUSEHOLD header
    pub household_token: Option<String>,
    /// CACHE-CONTROL max-age, in seconds
    pub keep_alive: u32,
    /// SERVER header
    pub user_agent: Option<String>,
    /// SEARCHPORT.UPNP.ORG header
    pub search_port: Option<u16>,
    /// DATE header
    pub date: Option<String>,
}

/// A multicast NOTIFY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// USN header
    pub unique_service_name: String,
    /// Device identity, the part of the USN before "::"
    pub id: String,
    /// Description document URL; always present except for goodbyes
    pub location: Option<String>,
    /// NT header
    pub target_scope: String,
    /// X-RINCON-BOOTSEQ, or failing that BOOTID.UPNP.ORG
    pub boot_id: Option<u32>,
    /// X-RINCON-HOUSEHOLD header
    pub household_token: Option<String>,
    /// NTS header, and the data that goes with it
    pub advertisement: Advertisement,
    /// SEARCHPORT.UPNP.ORG header
    pub search_port: Option<u16>,
    /// DATE header
    pub date: Option<String>,
}

/// An incoming SSDP message we understand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Answer to a search
    Response(DiscoveryResponse),
    /// Multicast advertisement
    Notify(Notification),
}

/// Why a datagram did not parse
///
/// These are never fatal: the datagram is just ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Not UTF-8
    #[error("datagram is not text")]
    InvalidData,

    /// Neither `HTTP/1.1 200 ...` nor `NOTIFY * HTTP/1.1`
    #[error("unexpected start line")]
    UnexpectedStartLine,

    /// A required header is absent or empty
    #[error("missing header {0}")]
    MissingHeader(&'static str),

    /// A header is present but unusable
    #[error("bad value for header {0}")]
    BadHeader(&'static str),

    /// NTS is not one of the three kinds we know
    #[error("unknown advertisement kind {0:?}")]
    UnknownAdvertisement(String),
}

/// The device identity from a unique service name
///
/// "uuid:RINCON_1::urn:schemas-upnp-org:device:ZonePlayer:1" gives
/// "uuid:RINCON_1".
#[must_use]
pub fn id_from_usn(usn: &str) -> Option<&str> {
    usn.split("::").next().filter(|id| !id.is_empty())
}

fn required<'a>(h: &'a Headers, key: &'static str) -> Result<&'a str, Error> {
    h.get(key)
        .filter(|v| !v.is_empty())
        .ok_or(Error::MissingHeader(key))
}

fn optional(h: &Headers, key: &'static str) -> Result<Option<String>, Error> {
    match h.get(key) {
        None => Ok(None),
        Some("") => Err(Error::MissingHeader(key)),
        Some(v) => Ok(Some(v.to_string())),
    }
}

fn optional_number<T: core::str::FromStr>(
    h: &Headers,
    key: &'static str,
) -> Result<Option<T>, Error> {
    optional(h, key)?
        .map(|v| v.parse::<T>().map_err(|_| Error::BadHeader(key)))
        .transpose()
}

/// Seconds from "max-age = 1800" or "max-age=1800"
fn keep_alive(h: &Headers) -> Result<u32, Error> {
    required(h, "CACHE-CONTROL")?
        .split_whitespace()
        .last()
        .and_then(|token| token.rsplit('=').next())
        .and_then(|n| n.parse::<u32>().ok())
        .ok_or(Error::BadHeader("CACHE-CONTROL"))
}

fn identity(h: &Headers) -> Result<(String, String), Error> {
    let usn = required(h, "USN")?;
    let id = id_from_usn(usn).ok_or(Error::BadHeader("USN"))?;
    Ok((usn.to_string(), id.to_string()))
}

fn boot_id(h: &Headers) -> Result<Option<u32>, Error> {
    match optional_number(h, "X-RINCON-BOOTSEQ")? {
        Some(n) => Ok(Some(n)),
        None => optional_number(h, "BOOTID.UPNP.ORG"),
    }
}

fn parse_response(h: &Headers) -> Result<DiscoveryResponse, Error> {
    let (unique_service_name, id) = identity(h)?;
    Ok(DiscoveryResponse {
        unique_service_name,
        id,
        location: required(h, "LOCATION")?.to_string(),
        target_scope: optional(h, "ST")?,
        boot_id: optional_number(h, "X-RINCON-BOOTSEQ")?
            .ok_or(Error::MissingHeader("X-RINCON-BOOTSEQ"))?,
        household_token: optional(h, "X-RINCON-HOUSEHOLD")?,
        keep_alive: keep_alive(h)?,
        user_agent: optional(h, "SERVER")?,
        search_port: optional_number(h, "SEARCHPORT.UPNP.ORG")?,
        date: optional(h, "DATE")?,
    })
}

fn parse_notify(h: &Headers) -> Result<Notification, Error> {
    let (unique_service_name, id) = identity(h)?;
    let boot_id = boot_id(h)?;
    let nts = required(h, "NTS")?;
    let advertisement = match nts {
        "ssdp:alive" => Advertisement::Alive {
            keep_alive: keep_alive(h)?,
            user_agent: optional(h, "SERVER")?,
        },
        "ssdp:update" => {
            let next_boot_id = match optional_number(h, "NEXTBOOTID.UPNP.ORG")? {
                Some(n) => n,
                None => boot_id
                    .and_then(|b: u32| b.checked_add(1))
                    .ok_or(Error::MissingHeader("NEXTBOOTID.UPNP.ORG"))?,
            };
            Advertisement::Update { next_boot_id }
        }
        "ssdp:byebye" => Advertisement::Goodbye,
        other => return Err(Error::UnknownAdvertisement(other.to_string())),
    };
    let location = if advertisement == Advertisement::Goodbye {
        optional(h, "LOCATION")?
    } else {
        Some(required(h, "LOCATION")?.to_string())
    };
    Ok(Notification {
        unique_service_name,
        id,
        location,
        target_scope: required(h, "NT")?.to_string(),
        boot_id,
        household_token: optional(h, "X-RINCON-HOUSEHOLD")?,
        advertisement,
        search_port: optional_number(h, "SEARCHPORT.UPNP.ORG")?,
        date: optional(h, "DATE")?,
    })
}

/// Parse an incoming datagram
///
/// # Errors
///
/// Returns an [`Error`] describing the first problem found; callers
/// are expected to log it at trace level and drop the datagram.
pub fn parse(buf: &[u8]) -> Result<Message, Error> {
    let text = core::str::from_utf8(buf).map_err(|_| Error::InvalidData)?;
    let h = Headers::parse(text);
    match h.start_line() {
        Some(StartLine::Status { version, code, .. })
            if version == "HTTP/1.1" && *code == 200 =>
        {
            parse_response(&h).map(Message::Response)
        }
        Some(StartLine::Request {
            method,
            path,
            version,
        }) if method == "NOTIFY" && path == "*" && version == "HTTP/1.1" => {
            parse_notify(&h).map(Message::Notify)
        }
        _ => Err(Error::UnexpectedStartLine),
    }
}

fn to_text(h: &Headers) -> String {
    // Every builder sets a start line first, so this cannot fail
    h.to_wire().unwrap_or_default()
}

/// The M-SEARCH request, as sent to 239.255.255.250:1900
#[must_use]
pub fn build_search(options: &DiscoveryOptions) -> String {
    let mut h = Headers::request("M-SEARCH", "*");
    h.set("HOST", SSDP_GROUP.to_string());
    h.set("MAN", "\"ssdp:discover\"");
    h.set("MX", options.max_wait_time.to_string());
    h.set("ST", options.target_scope.as_str());
    h.set("USER-AGENT", options.user_agent.as_str());
    to_text(&h)
}

fn set_common(
    h: &mut Headers,
    household_token: Option<&String>,
    search_port: Option<u16>,
    date: Option<&String>,
) {
    if let Some(t) = household_token {
        h.set("X-RINCON-HOUSEHOLD", t.as_str());
    }
    if let Some(p) = search_port {
        h.set("SEARCHPORT.UPNP.ORG", p.to_string());
    }
    if let Some(d) = date {
        h.set("DATE", d.as_str());
    }
}

/// The wire form of a search response, as a player would send it
#[must_use]
pub fn build_response(r: &DiscoveryResponse) -> String {
    let mut h = Headers::new();
    h.set_status_line(200, "OK");
    h.set("CACHE-CONTROL", format!("max-age = {}", r.keep_alive));
    h.set("LOCATION", r.location.as_str());
    if let Some(s) = &r.user_agent {
        h.set("SERVER", s.as_str());
    }
    if let Some(st) = &r.target_scope {
        h.set("ST", st.as_str());
    }
    h.set("USN", r.unique_service_name.as_str());
    h.set("X-RINCON-BOOTSEQ", r.boot_id.to_string());
    set_common(
        &mut h,
        r.household_token.as_ref(),
        r.search_port,
        r.date.as_ref(),
    );
    to_text(&h)
}

/// The wire form of a NOTIFY, as a player would send it
#[must_use]
pub fn build_notify(n: &Notification) -> String {
    let mut h = Headers::request("NOTIFY", "*");
    h.set("HOST", SSDP_GROUP.to_string());
    match &n.advertisement {
        Advertisement::Alive {
            keep_alive,
            user_agent,
        } => {
            h.set("CACHE-CONTROL", format!("max-age = {keep_alive}"));
            if let Some(s) = user_agent {
                h.set("SERVER", s.as_str());
            }
        }
        Advertisement::Update { next_boot_id } => {
            h.set("NEXTBOOTID.UPNP.ORG", next_boot_id.to_string());
        }
        Advertisement::Goodbye => {}
    }
    if let Some(l) = &n.location {
        h.set("LOCATION", l.as_str());
    }
    h.set("NT", n.target_scope.as_str());
    h.set(
        "NTS",
        match n.advertisement {
            Advertisement::Alive { .. } => "ssdp:alive",
            Advertisement::Update { .. } => "ssdp:update",
            Advertisement::Goodbye => "ssdp:byebye",
        },
    );
    h.set("USN", n.unique_service_name.as_str());
    if let Some(b) = n.boot_id {
        h.set("X-RINCON-BOOTSEQ", b.to_string());
    }
    set_common(
        &mut h,
        n.household_token.as_ref(),
        n.search_port,
        n.date.as_ref(),
    );
    to_text(&h)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const USN: &str =
        "uuid:RINCON_1::urn:schemas-upnp-org:device:ZonePlayer:1";

    pub(crate) fn response(id: &str, location: &str) -> DiscoveryResponse {
        DiscoveryResponse {
            unique_service_name: format!(
                "{id}::urn:schemas-upnp-org:device:ZonePlayer:1"
            ),
            id: id.to_string(),
            location: location.to_string(),
            target_scope: Some(crate::config::ZONE_PLAYER.to_string()),
            boot_id: 96,
            household_token: Some("Sonos_abcdef".to_string()),
            keep_alive: 1800,
            user_agent: Some("Linux UPnP/1.0 Sonos/70.3-35220 (ZPS9)".to_string()),
            search_port: None,
            date: None,
        }
    }

    pub(crate) fn notification(
        id: &str,
        location: Option<&str>,
        advertisement: Advertisement,
    ) -> Notification {
        Notification {
            unique_service_name: format!(
                "{id}::urn:schemas-upnp-org:device:ZonePlayer:1"
            ),
            id: id.to_string(),
            location: location.map(str::to_string),
            target_scope: crate::config::ZONE_PLAYER.to_string(),
            boot_id: Some(96),
            household_token: Some("Sonos_abcdef".to_string()),
            advertisement,
            search_port: None,
            date: None,
        }
    }

    #[test]
    fn id_is_usn_prefix() {
        assert_eq!(id_from_usn(USN), Some("uuid:RINCON_1"));
        assert_eq!(id_from_usn("uuid:RINCON_2"), Some("uuid:RINCON_2"));
        assert_eq!(id_from_usn("::urn:foo"), None);
        assert_eq!(id_from_usn(""), None);
    }

    #[test]
    fn vendor_spacing_example() {
        let text = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age = 1800\r\n\
LOCATION: http://192.168.13.37:1400/xml/device_description.xml\r\n\
USN: uuid:RINCON_1::urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
X-RINCON-BOOTSEQ: 96\r\n\r\n";
        let Ok(Message::Response(r)) = parse(text.as_bytes()) else {
            panic!("expected a response");
        };
        assert_eq!(r.id, "uuid:RINCON_1");
        assert_eq!(r.keep_alive, 1800);
        assert_eq!(r.boot_id, 96);
        assert_eq!(
            r.location,
            "http://192.168.13.37:1400/xml/device_description.xml"
        );
        assert_eq!(r.target_scope, None);
        assert_eq!(r.household_token, None);
    }

    #[test]
    fn compact_max_age() {
        let text = "HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=120\r\n\
LOCATION: http://a/\r\nUSN: uuid:X\r\nX-RINCON-BOOTSEQ: 3\r\n\r\n";
        let Ok(Message::Response(r)) = parse(text.as_bytes()) else {
            panic!("expected a response");
        };
        assert_eq!(r.keep_alive, 120);
        assert_eq!(r.id, "uuid:X");
    }

    #[test]
    fn response_round_trip() {
        let mut r = response("uuid:RINCON_1", "http://10.0.0.2:1400/xml/d.xml");
        r.search_port = Some(1901);
        r.date = Some("Sun, 18 Oct 2026 09:00:00 GMT".to_string());
        let wire = build_response(&r);
        assert_eq!(parse(wire.as_bytes()), Ok(Message::Response(r)));
    }

    #[test]
    fn sparse_response_round_trip() {
        let mut r = response("uuid:RINCON_1", "http://10.0.0.2:1400/xml/d.xml");
        r.target_scope = None;
        r.household_token = None;
        r.user_agent = None;
        let wire = build_response(&r);
        assert_eq!(parse(wire.as_bytes()), Ok(Message::Response(r)));
    }

    #[test]
    fn non_200_is_no_record() {
        let r = response("uuid:RINCON_1", "http://10.0.0.2:1400/");
        for status in [
            "HTTP/1.1 404 Not Found",
            "HTTP/1.0 200 OK",
            "HTTP/1.1 500 OK",
        ] {
            let wire =
                build_response(&r).replacen("HTTP/1.1 200 OK", status, 1);
            assert_eq!(
                parse(wire.as_bytes()),
                Err(Error::UnexpectedStartLine),
                "{status}"
            );
        }
    }

    #[test]
    fn response_missing_required_fields() {
        let good = build_response(&response("uuid:RINCON_1", "http://a/"));
        for (header, err) in [
            ("USN", Error::MissingHeader("USN")),
            ("LOCATION", Error::MissingHeader("LOCATION")),
            ("CACHE-CONTROL", Error::MissingHeader("CACHE-CONTROL")),
            ("X-RINCON-BOOTSEQ", Error::MissingHeader("X-RINCON-BOOTSEQ")),
        ] {
            let wire: String = good
                .split_inclusive("\r\n")
                .filter(|l| !l.starts_with(&format!("{header}:")))
                .collect();
            assert_eq!(parse(wire.as_bytes()), Err(err), "{header}");
        }
    }

    #[test]
    fn empty_optional_field_rejected() {
        let wire = build_response(&response("uuid:RINCON_1", "http://a/"))
            .replace("X-RINCON-HOUSEHOLD: Sonos_abcdef", "X-RINCON-HOUSEHOLD:");
        assert_eq!(
            parse(wire.as_bytes()),
            Err(Error::MissingHeader("X-RINCON-HOUSEHOLD"))
        );
    }

    #[test]
    fn garbage_rejected() {
        assert_eq!(parse(b"\xff\xfe"), Err(Error::InvalidData));
        assert_eq!(parse(b""), Err(Error::UnexpectedStartLine));
        assert_eq!(
            parse(b"HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=soon\r\nLOCATION: x\r\nUSN: uuid:1\r\nX-RINCON-BOOTSEQ: 1\r\n\r\n"),
            Err(Error::BadHeader("CACHE-CONTROL"))
        );
        assert_eq!(
            parse(b"HTTP/1.1 200 OK\r\nCACHE-CONTROL: max-age=1\r\nLOCATION: x\r\nUSN: uuid:1\r\nX-RINCON-BOOTSEQ: lots\r\n\r\n"),
            Err(Error::BadHeader("X-RINCON-BOOTSEQ"))
        );
    }

    #[test]
    fn search_is_not_for_us() {
        let wire = build_search(&DiscoveryOptions::default());
        assert_eq!(parse(wire.as_bytes()), Err(Error::UnexpectedStartLine));
    }

    #[test]
    fn alive_round_trip() {
        let n = notification(
            "uuid:RINCON_1",
            Some("http://10.0.0.2:1400/xml/d.xml"),
            Advertisement::Alive {
                keep_alive: 1800,
                user_agent: Some("Sonos".to_string()),
            },
        );
        let wire = build_notify(&n);
        assert_eq!(parse(wire.as_bytes()), Ok(Message::Notify(n)));
    }

    #[test]
    fn goodbye_round_trip() {
        let n = notification("uuid:RINCON_1", None, Advertisement::Goodbye);
        let wire = build_notify(&n);
        assert!(!wire.contains("LOCATION"));
        assert_eq!(parse(wire.as_bytes()), Ok(Message::Notify(n)));
    }

    #[test]
    fn update_round_trip() {
        let n = notification(
            "uuid:RINCON_1",
            Some("http://10.0.0.2:1400/xml/d.xml"),
            Advertisement::Update { next_boot_id: 200 },
        );
        let wire = build_notify(&n);
        assert_eq!(parse(wire.as_bytes()), Ok(Message::Notify(n)));
    }

    #[test]
    fn update_derives_next_boot_id() {
        let text = "NOTIFY * HTTP/1.1\r\nLOCATION: http://a/\r\nNT: x\r\n\
NTS: ssdp:update\r\nUSN: uuid:RINCON_1\r\nX-RINCON-BOOTSEQ: 96\r\n\r\n";
        let Ok(Message::Notify(n)) = parse(text.as_bytes()) else {
            panic!("expected a notification");
        };
        assert_eq!(n.advertisement, Advertisement::Update { next_boot_id: 97 });
    }

    #[test]
    fn update_falls_back_to_upnp_boot_id() {
        let text = "NOTIFY * HTTP/1.1\r\nLOCATION: http://a/\r\nNT: x\r\n\
NTS: ssdp:update\r\nUSN: uuid:RINCON_1\r\nBOOTID.UPNP.ORG: 7\r\n\r\n";
        let Ok(Message::Notify(n)) = parse(text.as_bytes()) else {
            panic!("expected a notification");
        };
        assert_eq!(n.boot_id, Some(7));
        assert_eq!(n.advertisement, Advertisement::Update { next_boot_id: 8 });
    }

    #[test]
    fn update_without_any_boot_id_rejected() {
        let text = "NOTIFY * HTTP/1.1\r\nLOCATION: http://a/\r\nNT: x\r\n\
NTS: ssdp:update\r\nUSN: uuid:RINCON_1\r\n\r\n";
        assert!(parse(text.as_bytes()).is_err());
    }

    #[test]
    fn alive_needs_location() {
        let text = "NOTIFY * HTTP/1.1\r\nCACHE-CONTROL: max-age=1\r\nNT: x\r\n\
NTS: ssdp:alive\r\nUSN: uuid:RINCON_1\r\n\r\n";
        assert_eq!(
            parse(text.as_bytes()),
            Err(Error::MissingHeader("LOCATION"))
        );
    }

    #[test]
    fn unknown_nts_is_no_record() {
        let text = "NOTIFY * HTTP/1.1\r\nLOCATION: http://a/\r\nNT: x\r\n\
NTS: ssdp:propchange\r\nUSN: uuid:RINCON_1\r\n\r\n";
        assert_eq!(
            parse(text.as_bytes()),
            Err(Error::UnknownAdvertisement("ssdp:propchange".to_string()))
        );
    }

    #[test]
    fn odd_notify_request_lines_are_no_record() {
        let n = build_notify(&notification(
            "uuid:RINCON_1",
            None,
            Advertisement::Goodbye,
        ));
        for line in [
            "NOTIFY /x HTTP/1.1",
            "NOTIFY * HTTP/1.0",
            "SUBSCRIBE * HTTP/1.1",
        ] {
            let wire = n.replacen("NOTIFY * HTTP/1.1", line, 1);
            assert_eq!(
                parse(wire.as_bytes()),
                Err(Error::UnexpectedStartLine),
                "{line}"
            );
        }
    }

    #[test]
    fn search_wire_text() {
        let o = DiscoveryOptions {
            max_wait_time: 1,
            user_agent: "test/1.0".to_string(),
            ..Default::default()
        };
        assert_eq!(
            build_search(&o),
            "M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 1\r\n\
ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
USER-AGENT: test/1.0\r\n\
\r\n"
        );
    }
}
