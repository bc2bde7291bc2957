//! Parser for PROPFIND `multistatus` responses.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use notesync_common::{Error, Result};

/// Body sent with every PROPFIND: only the properties the listing needs.
pub const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:resourcetype/>
    <d:getetag/>
    <d:getlastmodified/>
    <d:getcontentlength/>
  </d:prop>
</d:propfind>"#;

/// One `<response>` element of a multistatus document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavEntry {
    /// Raw (still percent-encoded) href.
    pub href: String,
    pub is_collection: bool,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
enum Field {
    Href,
    Etag,
    LastModified,
    ContentLength,
}

/// Parse a multistatus body into its responses, in document order.
///
/// Namespace prefixes are ignored; elements are matched by local name.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => current = Some(DavEntry::default()),
                b"href" => field = Some(Field::Href),
                b"getetag" => field = Some(Field::Etag),
                b"getlastmodified" => field = Some(Field::LastModified),
                b"getcontentlength" => field = Some(Field::ContentLength),
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_collection = true;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(f), Some(entry)) = (field, current.as_mut()) {
                    let text = t
                        .unescape()
                        .map_err(|e| Error::Serialization(format!("Bad multistatus text: {}", e)))?;
                    apply(entry, f, text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"href" | b"getetag" | b"getlastmodified" | b"getcontentlength" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(Error::Serialization(format!(
                    "Malformed multistatus at byte {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(entries)
}

fn apply(entry: &mut DavEntry, field: Field, text: &str) {
    if text.is_empty() {
        return;
    }
    match field {
        Field::Href => entry.href = text.to_string(),
        Field::Etag => entry.etag = Some(text.trim_matches('"').to_string()),
        Field::LastModified => {
            entry.last_modified = DateTime::parse_from_rfc2822(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc));
        }
        Field::ContentLength => entry.content_length = text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/files/alice/notesync/notes/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getetag>&quot;5f1a&quot;</d:getetag>
        <d:getlastmodified>Tue, 03 Sep 2024 10:15:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/alice/notesync/notes/42.json</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getetag>"abc"</d:getetag>
        <d:getcontentlength>311</d:getcontentlength>
        <d:getlastmodified>Wed, 04 Sep 2024 08:00:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/alice/notesync/notes/My%20Note.json</d:href>
    <d:propstat>
      <d:prop><d:getcontentlength>12</d:getcontentlength></d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn test_parse_sample() {
        let entries = parse_multistatus(SAMPLE).unwrap();
        assert_eq!(entries.len(), 3);

        assert!(entries[0].is_collection);
        assert_eq!(entries[0].etag.as_deref(), Some("5f1a"));

        let file = &entries[1];
        assert!(!file.is_collection);
        assert_eq!(file.href, "/remote.php/dav/files/alice/notesync/notes/42.json");
        assert_eq!(file.etag.as_deref(), Some("abc"));
        assert_eq!(file.content_length, Some(311));
        assert_eq!(
            file.last_modified.unwrap().to_rfc3339(),
            "2024-09-04T08:00:00+00:00"
        );

        assert!(entries[2].href.ends_with("My%20Note.json"));
        assert!(entries[2].etag.is_none());
    }

    #[test]
    fn test_parse_uppercase_prefix() {
        let xml = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/a/</D:href>
            <D:propstat><D:prop><D:resourcetype><D:collection></D:collection></D:resourcetype></D:prop></D:propstat>
            </D:response></D:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_collection);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            parse_multistatus("<d:multistatus><d:response></d:multistatus>"),
            Err(Error::Serialization(_))
        ));
    }
}
