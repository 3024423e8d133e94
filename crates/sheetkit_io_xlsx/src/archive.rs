//! Zip container with a content-type registry.

use std::io::{Seek, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::conf::{C_MIME_RELATIONSHIPS, C_NS_CONTENT_TYPES};
use crate::spec::XlsxStreamError;

/// Package container consumed by the sheet builder.
pub trait ArchivePackage {
    /// Start a new entry and return its write-once sink.
    ///
    /// The previous entry is closed implicitly.
    fn create_entry(&mut self, path: &str) -> Result<&mut dyn Write, XlsxStreamError>;

    /// Record the content type of a part written to `path`.
    fn register_content_type(&mut self, path: &str, mime: &str);
}

/// [`ArchivePackage`] over a deflate-compressed zip file.
pub struct ZipPackage<W: Write + Seek> {
    zip: ZipWriter<W>,
    l_overrides: Vec<(String, String)>,
    c_path_open: Option<String>,
}

impl<W: Write + Seek> ZipPackage<W> {
    pub fn new(writer: W) -> Self {
        Self {
            zip: ZipWriter::new(writer),
            l_overrides: Vec::new(),
            c_path_open: None,
        }
    }

    /// Write a complete entry in one call.
    pub fn write_entry(&mut self, path: &str, bytes: &[u8]) -> Result<(), XlsxStreamError> {
        self.create_entry(path)?.write_all(bytes)?;
        self.commit_entry();
        Ok(())
    }

    /// Mark the entry opened by [`ArchivePackage::create_entry`] as complete.
    pub fn commit_entry(&mut self) {
        self.c_path_open = None;
    }

    /// Remove the uncommitted entry from the archive, if there is one.
    ///
    /// Committed entries are never touched.
    pub fn abort_entry(&mut self) -> Result<Option<String>, XlsxStreamError> {
        let Some(c_path) = self.c_path_open.take() else {
            return Ok(None);
        };
        self.zip.abort_file()?;
        Ok(Some(c_path))
    }

    /// Registered `(part path, mime)` pairs in registration order.
    pub fn content_types(&self) -> &[(String, String)] {
        &self.l_overrides
    }

    /// Render `[Content_Types].xml` from the registry.
    pub fn render_content_types_xml(&self) -> String {
        let mut c_xml = String::with_capacity(256 + 160 * self.l_overrides.len());
        c_xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        c_xml.push_str(&format!("<Types xmlns=\"{C_NS_CONTENT_TYPES}\">"));
        c_xml.push_str(&format!(
            "<Default Extension=\"rels\" ContentType=\"{C_MIME_RELATIONSHIPS}\"/>"
        ));
        c_xml.push_str("<Default Extension=\"xml\" ContentType=\"application/xml\"/>");
        for (c_path, c_mime) in &self.l_overrides {
            c_xml.push_str(&format!(
                "<Override PartName=\"/{c_path}\" ContentType=\"{c_mime}\"/>"
            ));
        }
        c_xml.push_str("</Types>");
        c_xml
    }

    /// Close the last entry, write the central directory and return the sink.
    pub fn finish(self) -> Result<W, XlsxStreamError> {
        Ok(self.zip.finish()?)
    }
}

impl<W: Write + Seek> ArchivePackage for ZipPackage<W> {
    fn create_entry(&mut self, path: &str) -> Result<&mut dyn Write, XlsxStreamError> {
        let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);
        self.zip.start_file(path, options)?;
        self.c_path_open = Some(path.to_string());
        Ok(&mut self.zip)
    }

    fn register_content_type(&mut self, path: &str, mime: &str) {
        let c_path = path.trim_start_matches('/');
        if self.l_overrides.iter().any(|(c_known, _)| c_known == c_path) {
            return;
        }
        self.l_overrides.push((c_path.to_string(), mime.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use zip::ZipArchive;

    use super::*;
    use crate::conf::C_MIME_WORKSHEET;

    #[test]
    fn test_entries_round_trip_through_zip() {
        let mut package = ZipPackage::new(Cursor::new(Vec::new()));
        package.write_entry("xl/worksheets/sheet1.xml", b"<x:worksheet/>").unwrap();
        package.register_content_type("/xl/worksheets/sheet1.xml", C_MIME_WORKSHEET);
        package.register_content_type("xl/worksheets/sheet1.xml", C_MIME_WORKSHEET);
        assert_eq!(package.content_types().len(), 1);

        let c_types = package.render_content_types_xml();
        assert!(c_types.contains("<Override PartName=\"/xl/worksheets/sheet1.xml\""));

        let v_zip = package.finish().unwrap().into_inner();
        let mut archive = ZipArchive::new(Cursor::new(v_zip)).unwrap();
        let mut c_body = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut c_body)
            .unwrap();
        assert_eq!(c_body, "<x:worksheet/>");
    }

    #[test]
    fn test_abort_entry_drops_only_the_open_entry() {
        let mut package = ZipPackage::new(Cursor::new(Vec::new()));
        package.write_entry("keep.xml", b"<done/>").unwrap();
        assert_eq!(package.abort_entry().unwrap(), None);

        package
            .create_entry("partial.xml")
            .unwrap()
            .write_all(b"<x:row r=\"3\">")
            .unwrap();
        assert_eq!(package.abort_entry().unwrap().as_deref(), Some("partial.xml"));

        let v_zip = package.finish().unwrap().into_inner();
        let mut archive = ZipArchive::new(Cursor::new(v_zip)).unwrap();
        assert!(archive.by_name("partial.xml").is_err());
        let mut c_body = String::new();
        archive
            .by_name("keep.xml")
            .unwrap()
            .read_to_string(&mut c_body)
            .unwrap();
        assert_eq!(c_body, "<done/>");
    }
}
