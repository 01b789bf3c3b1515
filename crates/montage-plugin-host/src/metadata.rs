//! Plugin metadata documents and their fail-closed parser.
//!
//! A metadata document describes one plugin module: the physical library
//! name per platform and build configuration, and the class ids the module
//! provides. Validation rejects the whole document on the first deviation
//! from the expected shape; a [`PluginMetadata`] is never partially
//! populated. Platform and configuration are resolved while parsing, so the
//! result carries exactly one module file name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

use montage_plugin_sdk::ClassId;

/// Namespace current metadata documents must declare.
pub const METADATA_NAMESPACE: &str = "urn:montage:plugin:1";

const ROOT_ELEMENT: &[u8] = b"montage_plugin_description";
const KNOWN_PLATFORMS: [&str; 3] = ["windows", "macos", "linux"];

#[cfg(target_os = "windows")]
const PLATFORM_ELEMENT: &str = "windows";
#[cfg(target_os = "macos")]
const PLATFORM_ELEMENT: &str = "macos";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const PLATFORM_ELEMENT: &str = "linux";

/// Errors produced while locating or parsing a metadata document.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("failed to read metadata file {}: {source}", .path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("invalid metadata document {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },
}

/// Schema a document must conform to, identified by its namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSchema {
    namespace: String,
}

impl MetadataSchema {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl Default for MetadataSchema {
    fn default() -> Self {
        Self::new(METADATA_NAMESPACE)
    }
}

/// One class advertised by a metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDescription {
    pub id: ClassId,
    pub description: String,
}

/// Validated contents of one metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMetadata {
    name: String,
    version: String,
    module_file: String,
    classes: Vec<ClassDescription>,
}

impl PluginMetadata {
    /// Read and parse the document at `path`.
    pub fn from_file(
        path: impl AsRef<Path>,
        schema: &MetadataSchema,
    ) -> Result<Self, MetadataError> {
        let path = path.as_ref();
        let document = match fs::read_to_string(path) {
            Ok(document) => document,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                return Err(MetadataError::FileNotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(MetadataError::Unreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_document(&document, path, schema)
    }

    /// Parse an in-memory document; `origin` names it in diagnostics.
    pub fn from_document(
        document: &str,
        origin: &Path,
        schema: &MetadataSchema,
    ) -> Result<Self, MetadataError> {
        DocumentParser {
            reader: NsReader::from_str(document),
            origin,
            schema,
        }
        .parse()
    }

    /// Human-readable module name from the document root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Library file name for the current platform and build configuration.
    pub fn module_file(&self) -> &str {
        &self.module_file
    }

    pub fn classes(&self) -> &[ClassDescription] {
        &self.classes
    }
}

fn invalid(origin: &Path, reason: impl Into<String>) -> MetadataError {
    MetadataError::Parse {
        path: origin.to_path_buf(),
        reason: reason.into(),
    }
}

fn describe(event: &Event<'_>) -> &'static str {
    match event {
        Event::Start(_) | Event::Empty(_) => "element",
        Event::End(_) => "closing tag",
        Event::Text(_) => "text",
        Event::CData(_) => "CDATA",
        Event::Eof => "end of document",
        _ => "markup",
    }
}

fn is_blank(text: &BytesText<'_>) -> bool {
    text.iter().all(|byte| byte.is_ascii_whitespace())
}

struct DocumentParser<'a> {
    reader: NsReader<&'a [u8]>,
    origin: &'a Path,
    schema: &'a MetadataSchema,
}

impl<'a> DocumentParser<'a> {
    fn parse(mut self) -> Result<PluginMetadata, MetadataError> {
        let root = match self.next_event()? {
            (true, Event::Start(root)) if root.local_name().as_ref() == ROOT_ELEMENT => root,
            (false, Event::Start(_)) | (false, Event::Empty(_)) => {
                return Err(invalid(
                    self.origin,
                    format!(
                        "root element is not in the '{}' namespace",
                        self.schema.namespace()
                    ),
                ))
            }
            (_, Event::Eof) => return Err(invalid(self.origin, "document is empty")),
            (_, other) => {
                return Err(invalid(
                    self.origin,
                    format!("expected <montage_plugin_description>, found {}", describe(&other)),
                ))
            }
        };

        let attributes =
            self.collect_attributes(&root, "montage_plugin_description", &["name", "version"])?;
        let name = self.require_attribute("montage_plugin_description", &attributes, "name")?;
        let version = self.require_attribute("montage_plugin_description", &attributes, "version")?;

        let mut module_file = None;
        let mut classes = None;
        loop {
            let (in_schema, event) = self.next_event()?;
            // Self-closing sections go through the same dispatch as open ones.
            let (section, has_entries) = match event {
                Event::Start(section) => (section, true),
                Event::Empty(section) => (section, false),
                Event::End(_) => break,
                Event::Eof => return Err(invalid(self.origin, "unexpected end of document")),
                other => {
                    return Err(invalid(
                        self.origin,
                        format!("unexpected {} in <montage_plugin_description>", describe(&other)),
                    ))
                }
            };
            if !in_schema {
                return Err(invalid(
                    self.origin,
                    "foreign element in <montage_plugin_description>",
                ));
            }
            match section.local_name().as_ref() {
                b"module_name" => {
                    if module_file.is_some() {
                        return Err(invalid(self.origin, "duplicate <module_name> section"));
                    }
                    module_file = Some(self.parse_module_name(&section, has_entries)?);
                }
                b"classes" => {
                    if classes.is_some() {
                        return Err(invalid(self.origin, "duplicate <classes> section"));
                    }
                    classes = Some(self.parse_classes(&section, has_entries)?);
                }
                other => {
                    return Err(invalid(
                        self.origin,
                        format!("unknown element <{}>", String::from_utf8_lossy(other)),
                    ))
                }
            }
        }

        let module_file =
            module_file.ok_or_else(|| invalid(self.origin, "missing <module_name> section"))?;
        let classes = classes.ok_or_else(|| invalid(self.origin, "missing <classes> section"))?;

        if !matches!(self.next_event()?, (_, Event::Eof)) {
            return Err(invalid(self.origin, "content after the root element"));
        }

        Ok(PluginMetadata {
            name,
            version,
            module_file,
            classes,
        })
    }

    /// Resolve the `<module_name>` section to one file name for this
    /// platform and build configuration.
    fn parse_module_name(
        &mut self,
        section: &BytesStart<'a>,
        has_entries: bool,
    ) -> Result<String, MetadataError> {
        self.collect_attributes(section, "module_name", &[])?;

        let mut seen: Vec<String> = Vec::new();
        let mut selected = None;
        if has_entries {
            loop {
                let (in_schema, event) = self.next_event()?;
                let (entry, has_body) = match event {
                    Event::Empty(entry) => (entry, false),
                    Event::Start(entry) => (entry, true),
                    Event::End(_) => break,
                    other => {
                        return Err(invalid(
                            self.origin,
                            format!("unexpected {} in <module_name>", describe(&other)),
                        ))
                    }
                };
                if !in_schema {
                    return Err(invalid(self.origin, "foreign element in <module_name>"));
                }
                let platform = String::from_utf8_lossy(entry.local_name().as_ref()).into_owned();
                if !KNOWN_PLATFORMS.contains(&platform.as_str()) {
                    return Err(invalid(
                        self.origin,
                        format!("unknown platform element <{platform}>"),
                    ));
                }
                if seen.contains(&platform) {
                    return Err(invalid(
                        self.origin,
                        format!("duplicate platform element <{platform}>"),
                    ));
                }

                let attributes =
                    self.collect_attributes(&entry, &platform, &["debug", "release"])?;
                let debug = self.require_attribute(&platform, &attributes, "debug")?;
                let release = self.require_attribute(&platform, &attributes, "release")?;
                let file = if cfg!(debug_assertions) { debug } else { release };
                if file.is_empty() {
                    return Err(invalid(
                        self.origin,
                        format!("<{platform}> names an empty module file"),
                    ));
                }

                if has_body && !matches!(self.next_event()?, (_, Event::End(_))) {
                    return Err(invalid(
                        self.origin,
                        format!("<{platform}> carries content; platform entries must be empty"),
                    ));
                }

                if platform == PLATFORM_ELEMENT {
                    selected = Some(file);
                }
                seen.push(platform);
            }
        }

        selected.ok_or_else(|| {
            invalid(
                self.origin,
                format!("<module_name> has no <{PLATFORM_ELEMENT}> entry for this platform"),
            )
        })
    }

    fn parse_classes(
        &mut self,
        section: &BytesStart<'a>,
        has_entries: bool,
    ) -> Result<Vec<ClassDescription>, MetadataError> {
        self.collect_attributes(section, "classes", &[])?;

        let mut classes: Vec<ClassDescription> = Vec::new();
        if has_entries {
            loop {
                let (in_schema, event) = self.next_event()?;
                let (class, has_body) = match event {
                    Event::Start(class) => (class, true),
                    Event::Empty(class) => (class, false),
                    Event::End(_) => break,
                    other => {
                        return Err(invalid(
                            self.origin,
                            format!("unexpected {} in <classes>", describe(&other)),
                        ))
                    }
                };
                if !in_schema {
                    return Err(invalid(self.origin, "foreign element in <classes>"));
                }
                if class.local_name().as_ref() != b"class" {
                    return Err(invalid(
                        self.origin,
                        format!(
                            "unknown element <{}> in <classes>",
                            String::from_utf8_lossy(class.local_name().as_ref())
                        ),
                    ));
                }

                let attributes = self.collect_attributes(&class, "class", &["id"])?;
                let id = self.require_attribute("class", &attributes, "id")?;
                if id.trim().is_empty() {
                    return Err(invalid(self.origin, "class id must not be empty"));
                }
                if classes.iter().any(|known| known.id.as_str() == id) {
                    return Err(invalid(
                        self.origin,
                        format!("class id '{id}' appears twice in one document"),
                    ));
                }

                let description = if has_body {
                    self.parse_class_body()?
                } else {
                    String::new()
                };
                classes.push(ClassDescription {
                    id: ClassId::new(id),
                    description,
                });
            }
        }

        if classes.is_empty() {
            return Err(invalid(self.origin, "<classes> lists no classes"));
        }
        Ok(classes)
    }

    fn parse_class_body(&mut self) -> Result<String, MetadataError> {
        let mut description = None;
        loop {
            let (in_schema, event) = self.next_event()?;
            let (element, has_body) = match event {
                Event::Start(element) => (element, true),
                Event::Empty(element) => (element, false),
                Event::End(_) => break,
                other => {
                    return Err(invalid(
                        self.origin,
                        format!("unexpected {} in <class>", describe(&other)),
                    ))
                }
            };
            if !in_schema {
                return Err(invalid(self.origin, "foreign element in <class>"));
            }
            if element.local_name().as_ref() != b"description" {
                return Err(invalid(
                    self.origin,
                    format!(
                        "unknown element <{}> in <class>",
                        String::from_utf8_lossy(element.local_name().as_ref())
                    ),
                ));
            }
            if description.is_some() {
                return Err(invalid(self.origin, "duplicate <description> in <class>"));
            }
            self.collect_attributes(&element, "description", &[])?;
            description = Some(if has_body {
                self.parse_description()?
            } else {
                String::new()
            });
        }
        Ok(description.unwrap_or_default())
    }

    fn parse_description(&mut self) -> Result<String, MetadataError> {
        let mut content = String::new();
        loop {
            let (_, event) = self.next_event()?;
            match event {
                Event::Text(text) => match text.unescape() {
                    Ok(chunk) => content.push_str(&chunk),
                    Err(error) => return Err(invalid(self.origin, error.to_string())),
                },
                Event::CData(data) => {
                    content.push_str(&String::from_utf8_lossy(&data.into_inner()))
                }
                Event::End(_) => break,
                other => {
                    return Err(invalid(
                        self.origin,
                        format!("unexpected {} in <description>", describe(&other)),
                    ))
                }
            }
        }
        Ok(content.trim().to_string())
    }

    /// Next content event, with a flag telling whether the event's element
    /// resolved into the expected namespace. Prolog markup, comments and
    /// whitespace between elements are skipped.
    fn next_event(&mut self) -> Result<(bool, Event<'a>), MetadataError> {
        loop {
            let (resolution, event) = match self.reader.read_resolved_event() {
                Ok(pair) => pair,
                Err(error) => return Err(invalid(self.origin, error.to_string())),
            };
            let in_schema = matches!(
                resolution,
                ResolveResult::Bound(Namespace(namespace))
                    if namespace == self.schema.namespace().as_bytes()
            );
            match event {
                Event::Decl(_) | Event::DocType(_) | Event::Comment(_) | Event::PI(_) => continue,
                Event::Text(ref text) if is_blank(text) => continue,
                event => return Ok((in_schema, event)),
            }
        }
    }

    /// All attributes of `element` as name/value pairs, rejecting any name
    /// outside `allowed`. Namespace declarations are ignored.
    fn collect_attributes(
        &self,
        element: &BytesStart<'_>,
        element_name: &str,
        allowed: &[&str],
    ) -> Result<Vec<(String, String)>, MetadataError> {
        let mut attributes = Vec::new();
        for attribute in element.attributes() {
            let attribute = match attribute {
                Ok(attribute) => attribute,
                Err(error) => return Err(invalid(self.origin, error.to_string())),
            };
            if attribute.key.as_namespace_binding().is_some() {
                continue;
            }
            let name = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
            if attribute.key.prefix().is_some() || !allowed.contains(&name.as_str()) {
                return Err(invalid(
                    self.origin,
                    format!("unknown attribute '{name}' on <{element_name}>"),
                ));
            }
            let value = match attribute.unescape_value() {
                Ok(value) => value.into_owned(),
                Err(error) => return Err(invalid(self.origin, error.to_string())),
            };
            attributes.push((name, value));
        }
        Ok(attributes)
    }

    fn require_attribute(
        &self,
        element_name: &str,
        attributes: &[(String, String)],
        name: &str,
    ) -> Result<String, MetadataError> {
        attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| {
                invalid(
                    self.origin,
                    format!("<{element_name}> is missing the '{name}' attribute"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const STOCK_DOCUMENT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<montage_plugin_description xmlns="urn:montage:plugin:1" name="Stock tones" version="1.2">
    <module_name>
        <windows debug="stock_dbg.dll" release="stock.dll"/>
        <macos debug="libstock_dbg.dylib" release="libstock.dylib"/>
        <linux debug="libstock_dbg.so" release="libstock.so"/>
    </module_name>
    <classes>
        <class id="tone.sine">
            <description>Fixed-frequency sine source.</description>
        </class>
        <class id="filter.gain"/>
    </classes>
</montage_plugin_description>
"#;

    fn parse(document: &str) -> Result<PluginMetadata, MetadataError> {
        PluginMetadata::from_document(document, Path::new("stock.xml"), &MetadataSchema::default())
    }

    fn reason(result: Result<PluginMetadata, MetadataError>) -> String {
        match result.expect_err("document must be rejected") {
            MetadataError::Parse { reason, .. } => reason,
            other => panic!("expected a parse failure, got {other:?}"),
        }
    }

    #[test]
    fn valid_document_resolves_to_one_module_file() {
        let metadata = parse(STOCK_DOCUMENT).expect("valid document");
        assert_eq!(metadata.name(), "Stock tones");
        assert_eq!(metadata.version(), "1.2");

        let expected = match (PLATFORM_ELEMENT, cfg!(debug_assertions)) {
            ("windows", true) => "stock_dbg.dll",
            ("windows", false) => "stock.dll",
            ("macos", true) => "libstock_dbg.dylib",
            ("macos", false) => "libstock.dylib",
            (_, true) => "libstock_dbg.so",
            (_, false) => "libstock.so",
        };
        assert_eq!(metadata.module_file(), expected);

        let ids: Vec<&str> = metadata.classes().iter().map(|class| class.id.as_str()).collect();
        assert_eq!(ids, ["tone.sine", "filter.gain"]);
        assert_eq!(metadata.classes()[0].description, "Fixed-frequency sine source.");
        assert_eq!(metadata.classes()[1].description, "");
    }

    #[test]
    fn description_may_use_cdata() {
        let document = STOCK_DOCUMENT.replace(
            "<description>Fixed-frequency sine source.</description>",
            "<description><![CDATA[mixes <raw> & unescaped text]]></description>",
        );
        let metadata = parse(&document).expect("valid document");
        assert_eq!(metadata.classes()[0].description, "mixes <raw> & unescaped text");
    }

    #[test]
    fn wrong_namespace_is_rejected() {
        let document = STOCK_DOCUMENT.replace("urn:montage:plugin:1", "urn:somebody:else");
        assert!(reason(parse(&document)).contains("namespace"));
    }

    #[test]
    fn wrong_root_element_is_rejected() {
        let document = STOCK_DOCUMENT
            .replace("<montage_plugin_description ", "<plugin_pack ")
            .replace("</montage_plugin_description>", "</plugin_pack>");
        assert!(reason(parse(&document)).contains("expected <montage_plugin_description>"));
    }

    #[test]
    fn unknown_section_is_rejected() {
        let document =
            STOCK_DOCUMENT.replace("<classes>", "<signing vendor=\"someone\"/><classes>");
        assert!(reason(parse(&document)).contains("unknown element <signing>"));
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let document = STOCK_DOCUMENT.replace(
            "<class id=\"filter.gain\"/>",
            "<class id=\"filter.gain\" lazy=\"true\"/>",
        );
        assert!(reason(parse(&document)).contains("unknown attribute 'lazy'"));
    }

    #[test]
    fn duplicate_class_id_in_one_document_is_rejected() {
        let document = STOCK_DOCUMENT.replace(
            "<class id=\"filter.gain\"/>",
            "<class id=\"tone.sine\"/>",
        );
        assert!(reason(parse(&document)).contains("appears twice"));
    }

    #[test]
    fn empty_class_id_is_rejected() {
        let document = STOCK_DOCUMENT.replace("<class id=\"filter.gain\"/>", "<class id=\" \"/>");
        assert!(reason(parse(&document)).contains("empty"));
    }

    #[test]
    fn missing_platform_entry_for_this_platform_is_rejected() {
        let needle = format!("<{PLATFORM_ELEMENT} ");
        let mut document = String::new();
        for line in STOCK_DOCUMENT.lines() {
            if !line.trim_start().starts_with(&needle) {
                document.push_str(line);
                document.push('\n');
            }
        }
        assert!(reason(parse(&document)).contains("no <"));
    }

    #[test]
    fn missing_build_configuration_attribute_is_rejected() {
        let document = STOCK_DOCUMENT.replace(" debug=\"libstock_dbg.so\"", "");
        let document = document.replace(" debug=\"stock_dbg.dll\"", "");
        let document = document.replace(" debug=\"libstock_dbg.dylib\"", "");
        assert!(reason(parse(&document)).contains("missing the 'debug' attribute"));
    }

    #[test]
    fn duplicate_module_name_section_is_rejected() {
        let document = STOCK_DOCUMENT.replace(
            "<classes>",
            "<module_name><linux debug=\"a\" release=\"b\"/></module_name><classes>",
        );
        assert!(reason(parse(&document)).contains("duplicate <module_name>"));
    }

    #[test]
    fn missing_classes_section_is_rejected() {
        let start = STOCK_DOCUMENT.find("<classes>").unwrap();
        let end = STOCK_DOCUMENT.find("</classes>").unwrap() + "</classes>".len();
        let document = format!("{}{}", &STOCK_DOCUMENT[..start], &STOCK_DOCUMENT[end..]);
        assert!(reason(parse(&document)).contains("missing <classes>"));
    }

    #[test]
    fn empty_classes_section_is_rejected() {
        let start = STOCK_DOCUMENT.find("<classes>").unwrap();
        let end = STOCK_DOCUMENT.find("</classes>").unwrap() + "</classes>".len();
        let document = format!(
            "{}<classes></classes>{}",
            &STOCK_DOCUMENT[..start],
            &STOCK_DOCUMENT[end..]
        );
        assert!(reason(parse(&document)).contains("lists no classes"));
    }

    #[test]
    fn self_closing_known_sections_are_rejected() {
        let start = STOCK_DOCUMENT.find("<classes>").unwrap();
        let end = STOCK_DOCUMENT.find("</classes>").unwrap() + "</classes>".len();
        let document = format!(
            "{}<classes/>{}",
            &STOCK_DOCUMENT[..start],
            &STOCK_DOCUMENT[end..]
        );
        assert!(reason(parse(&document)).contains("lists no classes"));

        let start = STOCK_DOCUMENT.find("<module_name>").unwrap();
        let end = STOCK_DOCUMENT.find("</module_name>").unwrap() + "</module_name>".len();
        let document = format!(
            "{}<module_name/>{}",
            &STOCK_DOCUMENT[..start],
            &STOCK_DOCUMENT[end..]
        );
        assert!(reason(parse(&document)).contains("no <"));
    }

    #[test]
    fn truncated_document_is_rejected() {
        let document = &STOCK_DOCUMENT[..STOCK_DOCUMENT.len() / 2];
        assert!(matches!(parse(document), Err(MetadataError::Parse { .. })));
    }

    #[test]
    fn alternate_schema_namespace_is_honoured() {
        let schema = MetadataSchema::new("urn:somebody:else");
        let document = STOCK_DOCUMENT.replace("urn:montage:plugin:1", "urn:somebody:else");
        let metadata = PluginMetadata::from_document(&document, Path::new("stock.xml"), &schema)
            .expect("document matches the alternate schema");
        assert_eq!(metadata.name(), "Stock tones");
    }

    #[test]
    fn missing_file_is_reported_as_not_found() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("absent.xml");
        let error = PluginMetadata::from_file(&path, &MetadataSchema::default()).unwrap_err();
        assert!(matches!(error, MetadataError::FileNotFound(reported) if reported == path));
    }

    #[test]
    fn file_round_trip_matches_in_memory_parse() {
        let directory = tempfile::tempdir().expect("tempdir");
        let path = directory.path().join("stock.xml");
        std::fs::write(&path, STOCK_DOCUMENT).expect("write fixture");

        let from_file = PluginMetadata::from_file(&path, &MetadataSchema::default())
            .expect("fixture parses");
        let in_memory = parse(STOCK_DOCUMENT).expect("fixture parses");
        assert_eq!(from_file, in_memory);
    }
}
