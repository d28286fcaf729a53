//! `PROPFIND` multistatus parsing.

use chrono::{DateTime, Utc};
use cloud_sync::ProviderError;
use quick_xml::Reader;
use quick_xml::events::Event;

pub(crate) const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <d:getcontenttype/>
    <d:getcontentlength/>
    <d:getetag/>
    <d:getlastmodified/>
    <d:creationdate/>
  </d:prop>
</d:propfind>"#;

/// One `<d:response>` of a multistatus document.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct DavEntry {
    pub href: String,
    pub display_name: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub is_collection: bool,
}

impl DavEntry {
    fn set(&mut self, field: &str, text: String) {
        match field {
            "href" => self.href = text,
            "displayname" if !text.is_empty() => self.display_name = Some(text),
            "getcontenttype" => self.content_type = Some(text),
            "getcontentlength" => self.content_length = text.parse().ok(),
            "getetag" => self.etag = Some(text.trim_matches('"').to_owned()),
            "getlastmodified" => {
                self.last_modified = DateTime::parse_from_rfc2822(&text)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            }
            "creationdate" => {
                self.created = DateTime::parse_from_rfc3339(&text)
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            }
            _ => {}
        }
    }
}

const TEXT_FIELDS: [&str; 7] = [
    "href",
    "displayname",
    "getcontenttype",
    "getcontentlength",
    "getetag",
    "getlastmodified",
    "creationdate",
];

/// Parse a `207 Multi-Status` body. Namespace prefixes are ignored, so both
/// `d:` and `D:` style documents work.
pub(crate) fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>, ProviderError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field: Option<String> = None;
    let mut in_resourcetype = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "response" => current = Some(DavEntry::default()),
                    "resourcetype" => in_resourcetype = true,
                    "collection" if in_resourcetype => {
                        if let Some(entry) = current.as_mut() {
                            entry.is_collection = true;
                        }
                    }
                    other if TEXT_FIELDS.contains(&other) => field = Some(name),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if in_resourcetype
                    && e.local_name().as_ref() == b"collection"
                    && let Some(entry) = current.as_mut()
                {
                    entry.is_collection = true;
                }
            }
            Ok(Event::Text(t)) => {
                if let (Some(name), Some(entry)) = (field.as_deref(), current.as_mut()) {
                    let text = t
                        .unescape()
                        .map_err(|e| ProviderError::Parse(format!("bad multistatus text: {e}")))?
                        .into_owned();
                    entry.set(name, text);
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "response" => {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                    }
                    "resourcetype" => in_resourcetype = false,
                    _ => {
                        if field.as_deref() == Some(name.as_str()) {
                            field = None;
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProviderError::Parse(format!(
                    "invalid multistatus XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/files/ada/Docs/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getlastmodified>Tue, 01 Oct 2024 10:00:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/dav/files/ada/Docs/Q1%20report.pdf</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>Q1 report.pdf</d:displayname>
        <d:resourcetype/>
        <d:getcontenttype>application/pdf</d:getcontenttype>
        <d:getcontentlength>2048</d:getcontentlength>
        <d:getetag>"abc123"</d:getetag>
        <d:getlastmodified>Wed, 02 Oct 2024 08:30:00 GMT</d:getlastmodified>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn parses_collections_and_files() {
        let entries = parse_multistatus(LISTING).unwrap();
        assert_eq!(entries.len(), 2);

        assert!(entries[0].is_collection);
        assert_eq!(entries[0].href, "/dav/files/ada/Docs/");

        let file = &entries[1];
        assert!(!file.is_collection);
        assert_eq!(file.display_name.as_deref(), Some("Q1 report.pdf"));
        assert_eq!(file.content_length, Some(2048));
        assert_eq!(file.etag.as_deref(), Some("abc123"));
        assert!(file.last_modified.is_some());
    }

    #[test]
    fn uppercase_prefixes_work() {
        let xml = r#"<D:multistatus xmlns:D="DAV:"><D:response><D:href>/a.txt</D:href></D:response></D:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries[0].href, "/a.txt");
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let result = parse_multistatus("<d:multistatus><d:response></d:multistatus>");
        assert!(matches!(result, Err(ProviderError::Parse(_))));
    }
}
