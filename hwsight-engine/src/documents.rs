//! Built-in document flatteners behind the `json2Csv` and `xml2Csv` steps.

use async_trait::async_trait;

use crate::collaborator::DocumentFlattener;
use crate::error::ProtocolError;

/// JSON flattening on `serde_json`.
///
/// `entry_key` is a `/`-separated path (`/` alone is the document root).
/// An array at that path yields one entry per element, anything else a
/// single entry. Property paths are `/`-separated and relative to the
/// entry; array elements are addressed by index. Missing values are
/// empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFlattener;

impl JsonFlattener {
    fn lookup<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(value, |current, segment| match current {
                serde_json::Value::Object(map) => map.get(segment),
                serde_json::Value::Array(items) => {
                    segment.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                _ => None,
            })
    }

    fn render(value: Option<&serde_json::Value>) -> String {
        match value {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn flatten(
        json: &str,
        entry_key: &str,
        properties: &[String],
        separator: &str,
    ) -> Result<String, ProtocolError> {
        let document: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ProtocolError::failed(format!("invalid JSON: {e}")))?;

        let root = entry_key.trim_end_matches('/');
        let entries: Vec<(String, &serde_json::Value)> = match Self::lookup(&document, root) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (format!("{root}[{i}]"), item))
                .collect(),
            Some(value) => vec![(entry_key.to_string(), value)],
            None => Vec::new(),
        };

        let lines: Vec<String> = entries
            .into_iter()
            .map(|(path, entry)| {
                let mut line = format!("{path}{separator}");
                for property in properties {
                    line.push_str(&Self::render(Self::lookup(entry, property)));
                    line.push_str(separator);
                }
                line
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// XML flattening on `roxmltree`.
///
/// `record_tag` is a `/`-separated element path. With a leading `/` it is
/// absolute from the document element, otherwise it matches any element
/// whose path ends with it. Each `>`-separated property is a `/`-path
/// relative to the record: `..` climbs to the parent, a final `@name`
/// reads an attribute and an empty property is the record's own text. A
/// property starting with `/` is resolved from the document element.
/// Missing values are empty. Namespace prefixes are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlFlattener;

impl XmlFlattener {
    fn segments(path: &str) -> Vec<&str> {
        path.split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    fn element_path(node: roxmltree::Node<'_, '_>) -> Vec<String> {
        let mut path: Vec<String> = node
            .ancestors()
            .filter(|n| n.is_element())
            .map(|n| n.tag_name().name().to_string())
            .collect();
        path.reverse();
        path
    }

    fn text(node: roxmltree::Node<'_, '_>) -> String {
        node.children()
            .filter(|child| child.is_text())
            .filter_map(|child| child.text())
            .collect::<String>()
            .trim()
            .to_string()
    }

    fn value(
        record: roxmltree::Node<'_, '_>,
        document_element: roxmltree::Node<'_, '_>,
        property: &str,
    ) -> String {
        let property = property.trim();
        let (mut node, segments) = match property.strip_prefix('/') {
            Some(absolute) => {
                let segments = Self::segments(absolute);
                match segments.split_first() {
                    Some((first, rest)) if *first == document_element.tag_name().name() => {
                        (Some(document_element), rest.to_vec())
                    }
                    _ => (None, Vec::new()),
                }
            }
            None => (Some(record), Self::segments(property)),
        };

        for segment in segments {
            let Some(current) = node else { break };
            if let Some(attribute) = segment.strip_prefix('@') {
                return current.attribute(attribute).unwrap_or_default().to_string();
            }
            node = match segment {
                "." => Some(current),
                ".." => current.parent_element(),
                name => current
                    .children()
                    .find(|child| child.is_element() && child.tag_name().name() == name),
            };
        }
        node.map(Self::text).unwrap_or_default()
    }

    pub fn flatten(
        xml: &str,
        record_tag: &str,
        properties: &str,
    ) -> Result<Vec<Vec<String>>, ProtocolError> {
        let record_path: Vec<String> = Self::segments(record_tag)
            .into_iter()
            .map(str::to_string)
            .collect();
        if record_path.is_empty() {
            return Err(ProtocolError::failed("empty XML record tag"));
        }
        let absolute = record_tag.trim_start().starts_with('/');

        let document = roxmltree::Document::parse(xml)
            .map_err(|e| ProtocolError::failed(format!("invalid XML: {e}")))?;
        let document_element = document.root_element();
        let properties: Vec<&str> = properties.split('>').collect();

        let rows = document
            .descendants()
            .filter(|node| node.is_element())
            .filter(|node| {
                let path = Self::element_path(*node);
                if absolute {
                    path == record_path
                } else {
                    path.ends_with(&record_path)
                }
            })
            .map(|record| {
                properties
                    .iter()
                    .map(|property| Self::value(record, document_element, property))
                    .collect()
            })
            .collect();
        Ok(rows)
    }
}

/// The flattener installed by default: [`JsonFlattener`] and [`XmlFlattener`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardDocuments;

#[async_trait]
impl DocumentFlattener for StandardDocuments {
    async fn json_to_csv(
        &self,
        json: &str,
        entry_key: &str,
        properties: &[String],
        separator: &str,
    ) -> Result<String, ProtocolError> {
        JsonFlattener::flatten(json, entry_key, properties, separator)
    }

    async fn xml_to_rows(
        &self,
        xml: &str,
        record_tag: &str,
        properties: &str,
    ) -> Result<Vec<Vec<String>>, ProtocolError> {
        XmlFlattener::flatten(xml, record_tag, properties)
    }
}
