//! MAFF multi-page archive metadata.
//!
//! Translated from `util.get_maff_pages`/`util.parse_maff_index_rdf`: each
//! top-level directory in a MAFF archive represents one captured page,
//! described by an `index.rdf` RDF/XML document naming the attributes
//! below, falling back to any `index.*` entry with no metadata when the
//! RDF file is missing or unparsable.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use wsb_domain::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaffPageInfo {
    pub title: Option<String>,
    pub original_url: Option<String>,
    pub archive_time: Option<String>,
    pub index_filename: Option<String>,
    pub charset: Option<String>,
}

/// Enumerate the pages in a MAFF archive, one per top-level directory.
pub fn get_maff_pages(archive_path: &Path) -> Result<Vec<MaffPageInfo>> {
    let names = crate::archive::list_dir(archive_path, "")?;
    let mut pages = Vec::new();

    for top in names {
        if top.kind != crate::archive::EntryKind::Dir {
            continue;
        }
        let topdir = top.name;
        let rdf_path = format!("{topdir}/index.rdf");

        let page = match crate::archive::read_entry(archive_path, &rdf_path) {
            Ok(bytes) => parse_maff_index_rdf(&bytes).unwrap_or_default(),
            Err(_) => {
                // No index.rdf: fall back to any index.* entry (not index.rdf itself).
                let children = crate::archive::list_dir(archive_path, &topdir)?;
                let fallback = children.into_iter().find(|c| {
                    c.kind == crate::archive::EntryKind::File
                        && c.name.starts_with("index.")
                        && c.name != "index.rdf"
                });
                MaffPageInfo {
                    index_filename: fallback.map(|c| c.name),
                    ..Default::default()
                }
            }
        };

        let filename = page.index_filename.as_deref().unwrap_or("index.html");
        pages.push(MaffPageInfo {
            index_filename: Some(format!("{topdir}/{filename}")),
            ..page
        });
    }

    Ok(pages)
}

fn parse_maff_index_rdf(bytes: &[u8]) -> Option<MaffPageInfo> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    let mut info = MaffPageInfo::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                let local = local_name(e.name().as_ref());
                let resource = e
                    .attributes()
                    .flatten()
                    .find(|a| local_name(a.key.as_ref()) == "resource")
                    .map(|a| a.unescape_value().unwrap_or_default().to_string());

                match local.as_str() {
                    "title" => info.title = resource,
                    "originalurl" => info.original_url = resource,
                    "archivetime" => info.archive_time = resource,
                    "indexfilename" => info.index_filename = resource,
                    "charset" => info.charset = resource,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    Some(info)
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_maf_namespaced_attributes() {
        let xml = br#"<RDF:RDF xmlns:MAF="http://maf.mozdev.org/metadata/rdf#"
            xmlns:NC="http://home.netscape.com/NC-rdf#"
            xmlns:RDF="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
            <RDF:Description RDF:about="urn:root">
                <MAF:title RDF:resource="Example Page"/>
                <MAF:originalurl RDF:resource="https://example.com/"/>
                <MAF:indexfilename RDF:resource="index.html"/>
                <MAF:charset RDF:resource="UTF-8"/>
            </RDF:Description>
        </RDF:RDF>"#;

        let info = parse_maff_index_rdf(xml).unwrap();
        assert_eq!(info.title.as_deref(), Some("Example Page"));
        assert_eq!(info.original_url.as_deref(), Some("https://example.com/"));
        assert_eq!(info.index_filename.as_deref(), Some("index.html"));
        assert_eq!(info.charset.as_deref(), Some("UTF-8"));
    }

    fn make_zip(path: &std::path::Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            zip.start_file(*name, zip::write::FileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut zip, data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn get_maff_pages_joins_topdir_onto_rdf_index_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.maff");
        let rdf = br#"<RDF:RDF xmlns:MAF="http://maf.mozdev.org/metadata/rdf#">
            <RDF:Description>
                <MAF:indexfilename RDF:resource="page.html"/>
            </RDF:Description>
        </RDF:RDF>"#;
        make_zip(
            &path,
            &[
                ("2024-01-01-example/index.rdf", rdf),
                ("2024-01-01-example/page.html", b"<html></html>"),
            ],
        );

        let pages = get_maff_pages(&path).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].index_filename.as_deref(),
            Some("2024-01-01-example/page.html")
        );
    }

    #[test]
    fn get_maff_pages_joins_topdir_onto_fallback_index_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.maff");
        make_zip(
            &path,
            &[("page1/index.xhtml", b"<html></html>")],
        );

        let pages = get_maff_pages(&path).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(
            pages[0].index_filename.as_deref(),
            Some("page1/index.xhtml")
        );
    }

    #[test]
    fn malformed_xml_returns_none() {
        assert!(parse_maff_index_rdf(b"<not valid").is_none());
    }
}
