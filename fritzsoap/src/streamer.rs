//! Décodage typé et paresseux des réponses SOAP
//!
//! A response body is scanned with a `quick_xml::Reader`; each element whose
//! local name matches [`SoapResult::ELEMENT_NAME`] is cut out of the source
//! text and handed to `quick_xml::de`.

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;

/// A record type decoded from a SOAP response.
///
/// ```
/// use fritzsoap::SoapResult;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct SecurityPort {
///     #[serde(rename = "NewSecurityPort")]
///     port: u16,
/// }
///
/// impl SoapResult for SecurityPort {
///     const ELEMENT_NAME: &'static str = "GetSecurityPortResponse";
/// }
/// ```
pub trait SoapResult: DeserializeOwned {
    /// Local name of the element holding one record.
    const ELEMENT_NAME: &'static str;
}

/// Errors raised while streaming records.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("XML read error: {0}")]
    Read(#[from] quick_xml::Error),

    #[error("Cannot decode <{element}>: {source}")]
    Decode {
        element: &'static str,
        #[source]
        source: quick_xml::de::DeError,
    },
}

/// Lazy, finite iterator over the `T` records contained in `xml`.
///
/// Each item is decoded only when pulled. Once an error has been yielded the
/// iterator is exhausted.
pub struct SoapStream<'a, T> {
    source: &'a str,
    reader: Reader<&'a [u8]>,
    done: bool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

/// Streams every `T` found in `xml`.
pub fn stream_instances<T: SoapResult>(xml: &str) -> SoapStream<'_, T> {
    SoapStream {
        source: xml,
        reader: Reader::from_str(xml),
        done: false,
        _marker: std::marker::PhantomData,
    }
}

impl<'a, T: SoapResult> SoapStream<'a, T> {
    fn next_fragment(&mut self) -> Result<Option<&'a str>, quick_xml::Error> {
        let source = self.source;
        loop {
            let start = self.reader.buffer_position() as usize;
            match self.reader.read_event()? {
                Event::Start(e) if e.local_name().as_ref() == T::ELEMENT_NAME.as_bytes() => {
                    let end = e.to_end().into_owned();
                    self.reader.read_to_end(end.name())?;
                    let stop = self.reader.buffer_position() as usize;
                    return Ok(Some(source[start..stop].trim_start()));
                }
                Event::Empty(e) if e.local_name().as_ref() == T::ELEMENT_NAME.as_bytes() => {
                    let stop = self.reader.buffer_position() as usize;
                    return Ok(Some(source[start..stop].trim_start()));
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

impl<T: SoapResult> Iterator for SoapStream<'_, T> {
    type Item = Result<T, StreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let fragment = match self.next_fragment() {
            Ok(Some(fragment)) => fragment,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(e.into()));
            }
        };

        let decoded = quick_xml::de::from_str::<T>(fragment).map_err(|source| StreamError::Decode {
            element: T::ELEMENT_NAME,
            source,
        });
        if decoded.is_err() {
            self.done = true;
        }
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct HostEntry {
        #[serde(rename = "NewIPAddress")]
        ip: String,
        #[serde(rename = "NewHostName")]
        name: String,
    }

    impl SoapResult for HostEntry {
        const ELEMENT_NAME: &'static str = "GetGenericHostEntryResponse";
    }

    #[derive(Debug, Deserialize)]
    struct Port {
        #[serde(rename = "NewSecurityPort")]
        _port: u16,
    }

    impl SoapResult for Port {
        const ELEMENT_NAME: &'static str = "GetSecurityPortResponse";
    }

    const HOSTS: &str = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
<s:Body>
<u:GetGenericHostEntryResponse xmlns:u="urn:dslforum-org:service:Hosts:1">
<NewIPAddress>192.168.178.20</NewIPAddress>
<NewHostName>laptop</NewHostName>
</u:GetGenericHostEntryResponse>
<u:GetGenericHostEntryResponse xmlns:u="urn:dslforum-org:service:Hosts:1">
<NewIPAddress>192.168.178.21</NewIPAddress>
<NewHostName>printer</NewHostName>
</u:GetGenericHostEntryResponse>
</s:Body>
</s:Envelope>"#;

    #[test]
    fn test_stream_all_instances() {
        let hosts: Vec<HostEntry> = stream_instances::<HostEntry>(HOSTS)
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].ip, "192.168.178.20");
        assert_eq!(hosts[1].name, "printer");
    }

    #[test]
    fn test_stream_is_lazy() {
        let mut stream = stream_instances::<HostEntry>(HOSTS);
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.name, "laptop");
        assert!(stream.next().is_some());
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_no_matching_element() {
        assert_eq!(stream_instances::<Port>(HOSTS).count(), 0);
    }

    #[test]
    fn test_decode_error_stops_stream() {
        let xml = r#"<r><GetSecurityPortResponse><NewSecurityPort>abc</NewSecurityPort></GetSecurityPortResponse>
<GetSecurityPortResponse><NewSecurityPort>1</NewSecurityPort></GetSecurityPortResponse></r>"#;
        let mut stream = stream_instances::<Port>(xml);

        assert!(matches!(stream.next(), Some(Err(StreamError::Decode { .. }))));
        assert!(stream.next().is_none());
    }
}
