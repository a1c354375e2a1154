use regex::Regex;
use url::Url;

use crate::config::CswEndpoint;
use crate::domain::{CandidateFile, RecordKey};
use crate::error::GeoextentError;
use crate::extent::{GeometryExtent, TemporalExtent};
use crate::http::HttpClient;
use crate::metadata::MetadataDocument;
use crate::providers::Provider;
use crate::resolver::{host_matches, is_uuid, parse_http_url};

const ISO_SCHEMA: &str = "http://www.isotc211.org/2005/gmd";
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "php", "jsp", "aspx"];

/// OGC catalogue services returning ISO 19115/19139 records.
pub struct CswProvider {
    name: String,
    http: HttpClient,
    endpoint: CswEndpoint,
}

impl CswProvider {
    pub fn new(http: HttpClient, endpoint: CswEndpoint) -> Self {
        Self {
            name: format!("csw:{}", endpoint.host),
            http,
            endpoint,
        }
    }

    fn record_url(&self, id: &str) -> String {
        let mut url = match Url::parse(&self.endpoint.csw_url) {
            Ok(url) => url,
            Err(_) => return format!("{}?id={id}", self.endpoint.csw_url),
        };
        url.query_pairs_mut()
            .append_pair("service", "CSW")
            .append_pair("version", "2.0.2")
            .append_pair("request", "GetRecordById")
            .append_pair("id", id)
            .append_pair("outputSchema", ISO_SCHEMA)
            .append_pair("elementSetName", "full");
        url.to_string()
    }
}

impl Provider for CswProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_reference(&self, reference: &str) -> Option<RecordKey> {
        let url = parse_http_url(reference)?;
        if !host_matches(&url, std::slice::from_ref(&self.endpoint.host)) {
            return None;
        }
        // GeoNetwork puts the id in the path, the query or the fragment.
        let re = Regex::new(
            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        )
        .unwrap();
        re.find(url.as_str()).map(|id| RecordKey::new(id.as_str()))
    }

    fn probe_reference(&self, reference: &str) -> Option<RecordKey> {
        let id = reference.trim();
        if !is_uuid(id) {
            return None;
        }
        let xml = self.http.get_text(&self.record_url(id)).ok()?;
        has_record(&xml).then(|| RecordKey::new(id))
    }

    fn fetch_metadata(&self, key: &RecordKey) -> Result<MetadataDocument, GeoextentError> {
        let url = self.record_url(key.as_str());
        let xml = self.http.get_text(&url)?;
        if !has_record(&xml) {
            return Err(GeoextentError::NotFound(url));
        }
        Ok(parse_iso_record(&xml))
    }
}

pub fn has_record(xml: &str) -> bool {
    let re = Regex::new(r"<(?:\w+:)?MD_Metadata[\s>]").unwrap();
    re.is_match(xml)
}

fn element_text(fragment: &str, element: &str) -> Option<String> {
    let pattern = format!(
        r"(?s)<(?:\w+:)?{element}(?:\s[^>]*)?>\s*(?:<(?:\w+:)?(?:CharacterString|Decimal|URL|Real)(?:\s[^>]*)?>)?([^<]*)<"
    );
    let re = Regex::new(&pattern).ok()?;
    let text = re.captures(fragment)?.get(1)?.as_str().trim();
    (!text.is_empty()).then(|| unescape(text))
}

fn blocks<'a>(xml: &'a str, element: &str) -> Vec<&'a str> {
    let pattern = format!(r"(?s)<(?:\w+:)?{element}[\s>](.*?)</(?:\w+:)?{element}>");
    let Ok(re) = Regex::new(&pattern) else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn parse_iso_record(xml: &str) -> MetadataDocument {
    let mut doc = MetadataDocument {
        title: blocks(xml, "citation")
            .first()
            .and_then(|citation| element_text(citation, "title"))
            .or_else(|| element_text(xml, "title")),
        ..Default::default()
    };

    let restriction = Regex::new(r#"MD_RestrictionCode[^>]*codeListValue\s*=\s*"([^"]+)""#).unwrap();
    doc.restricted = restriction
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .any(|code| code.as_str() == "restricted");

    for bbox in blocks(xml, "EX_GeographicBoundingBox") {
        let value = |name: &str| element_text(bbox, name).and_then(|text| text.parse::<f64>().ok());
        if let (Some(west), Some(east), Some(south), Some(north)) = (
            value("westBoundLongitude"),
            value("eastBoundLongitude"),
            value("southBoundLatitude"),
            value("northBoundLatitude"),
        ) {
            doc.push_geometry(GeometryExtent::new(west, south, east, north));
        }
    }
    for identifier in blocks(xml, "EX_GeographicDescription") {
        if let Some(code) = element_text(identifier, "code") {
            doc.place_names.push(code);
        }
    }

    for period in blocks(xml, "TimePeriod") {
        let begin = element_text(period, "beginPosition");
        let end = element_text(period, "endPosition");
        doc.push_temporal(TemporalExtent::parse(begin.as_deref(), end.as_deref()));
    }
    for instant in blocks(xml, "TimeInstant") {
        let position = element_text(instant, "timePosition");
        doc.push_temporal(TemporalExtent::parse(position.as_deref(), position.as_deref()));
    }

    doc.files = online_files(xml);
    doc
}

fn online_files(xml: &str) -> Vec<CandidateFile> {
    let function = Regex::new(r#"CI_OnLineFunctionCode[^>]*codeListValue\s*=\s*"([^"]+)""#).unwrap();
    let mut files = Vec::new();
    for resource in blocks(xml, "CI_OnlineResource") {
        let Some(link) = element_text(resource, "linkage") else {
            continue;
        };
        let Some(url) = parse_http_url(&link) else {
            continue;
        };
        let is_download = function
            .captures(resource)
            .and_then(|caps| caps.get(1))
            .is_some_and(|code| code.as_str() == "download");
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or("")
            .to_string();
        let extension = segment
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        let looks_like_file = url.query().is_none()
            && extension.is_some_and(|ext| !PAGE_EXTENSIONS.contains(&ext.as_str()));
        if !is_download && !looks_like_file {
            continue;
        }
        let name = element_text(resource, "name")
            .filter(|name| name.contains('.'))
            .unwrap_or(segment);
        let name = if name.is_empty() { "download".to_string() } else { name };
        if files.iter().any(|file: &CandidateFile| file.url == url.as_str()) {
            continue;
        }
        files.push(CandidateFile::from_metadata(name, url.to_string(), 0));
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    const RECORD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<csw:GetRecordByIdResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2">
  <gmd:MD_Metadata xmlns:gmd="http://www.isotc211.org/2005/gmd" xmlns:gco="http://www.isotc211.org/2005/gco" xmlns:gml="http://www.opengis.net/gml">
    <gmd:identificationInfo><gmd:MD_DataIdentification>
      <gmd:citation><gmd:CI_Citation>
        <gmd:title><gco:CharacterString>Digitales Geländemodell &amp; Gewässernetz</gco:CharacterString></gmd:title>
      </gmd:CI_Citation></gmd:citation>
      <gmd:resourceConstraints><gmd:MD_LegalConstraints>
        <gmd:accessConstraints><gmd:MD_RestrictionCode codeList="x" codeListValue="otherRestrictions"/></gmd:accessConstraints>
      </gmd:MD_LegalConstraints></gmd:resourceConstraints>
      <gmd:extent><gmd:EX_Extent>
        <gmd:geographicElement><gmd:EX_GeographicBoundingBox>
          <gmd:westBoundLongitude><gco:Decimal>9.0</gco:Decimal></gmd:westBoundLongitude>
          <gmd:eastBoundLongitude><gco:Decimal>11.0</gco:Decimal></gmd:eastBoundLongitude>
          <gmd:southBoundLatitude><gco:Decimal>53.0</gco:Decimal></gmd:southBoundLatitude>
          <gmd:northBoundLatitude><gco:Decimal>55.0</gco:Decimal></gmd:northBoundLatitude>
        </gmd:EX_GeographicBoundingBox></gmd:geographicElement>
        <gmd:temporalElement><gmd:EX_TemporalExtent><gmd:extent>
          <gml:TimePeriod gml:id="t1"><gml:beginPosition>2005-01-01</gml:beginPosition><gml:endPosition>2006-01-01</gml:endPosition></gml:TimePeriod>
        </gmd:extent></gmd:EX_TemporalExtent></gmd:temporalElement>
      </gmd:EX_Extent></gmd:extent>
    </gmd:MD_DataIdentification></gmd:identificationInfo>
    <gmd:distributionInfo><gmd:MD_Distribution><gmd:transferOptions><gmd:MD_DigitalTransferOptions>
      <gmd:onLine><gmd:CI_OnlineResource>
        <gmd:linkage><gmd:URL>https://example.org/data/dgm.zip</gmd:URL></gmd:linkage>
        <gmd:function><gmd:CI_OnLineFunctionCode codeList="x" codeListValue="download"/></gmd:function>
      </gmd:CI_OnlineResource></gmd:onLine>
      <gmd:onLine><gmd:CI_OnlineResource>
        <gmd:linkage><gmd:URL>https://example.org/wms?SERVICE=WMS&amp;REQUEST=GetCapabilities</gmd:URL></gmd:linkage>
      </gmd:CI_OnlineResource></gmd:onLine>
      <gmd:onLine><gmd:CI_OnlineResource>
        <gmd:linkage><gmd:URL>https://example.org/info.html</gmd:URL></gmd:linkage>
      </gmd:CI_OnlineResource></gmd:onLine>
    </gmd:MD_DigitalTransferOptions></gmd:transferOptions></gmd:MD_Distribution></gmd:distributionInfo>
  </gmd:MD_Metadata>
</csw:GetRecordByIdResponse>"#;

    #[test]
    fn parses_iso_record() {
        assert!(has_record(RECORD));
        let doc = parse_iso_record(RECORD);
        assert_eq!(doc.title.as_deref(), Some("Digitales Geländemodell & Gewässernetz"));
        assert!(!doc.restricted);
        assert_eq!(doc.geometries[0].as_array(), [9.0, 53.0, 11.0, 55.0]);
        assert_eq!(doc.temporals[0].start.unwrap().to_string(), "2005-01-01");
        assert_eq!(doc.files.len(), 1);
        assert_eq!(doc.files[0].name, "dgm.zip");
    }

    #[test]
    fn empty_response_has_no_record() {
        assert!(!has_record(
            r#"<csw:GetRecordByIdResponse xmlns:csw="http://www.opengis.net/cat/csw/2.0.2"/>"#
        ));
    }

    #[test]
    fn matches_geonetwork_urls() {
        let settings = Settings::default();
        let provider = CswProvider::new(
            HttpClient::new(&settings).unwrap(),
            settings.endpoints.csw[0].clone(),
        );
        let key = provider
            .match_reference(
                "https://gdk.gdi-de.org/gdi-de/srv/eng/catalog.search#/metadata/9ab8c1d6-3e4f-4a1b-8c2d-0e9f7a6b5c4d",
            )
            .unwrap();
        assert_eq!(key.as_str(), "9ab8c1d6-3e4f-4a1b-8c2d-0e9f7a6b5c4d");
        assert!(provider.match_reference("https://gdk.gdi-de.org/about").is_none());
        let url = provider.record_url("abc");
        assert!(url.contains("request=GetRecordById"));
        assert!(url.contains("id=abc"));
    }
}
