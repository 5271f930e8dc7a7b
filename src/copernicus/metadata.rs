use crate::error::MetadataError;
use regex::Regex;
use roxmltree::Node;
use std::sync::OnceLock;

/// Element path from the document root to the `Granule` element, matched by local name so the
/// `n1:` namespace prefix used by the product schemas does not matter.
const GRANULE_PATH: [&str; 5] = [
    "General_Info",
    "Product_Info",
    "Product_Organisation",
    "Granule_List",
    "Granule",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductMetadata {
    /// Absolute orbit token of the granule, e.g. `A046314`.
    pub granule: String,
    /// Datastrip sensing time, e.g. `20240504T195929`.
    pub datastrip: String,
}

/// Extracts the granule and datastrip identifiers from a product metadata document
/// (`MTD_MSIL2A.xml` and friends).
pub fn resolve(document: &str) -> Result<ProductMetadata, MetadataError> {
    let doc = roxmltree::Document::parse(document).map_err(|e| MetadataError::Xml(e.to_string()))?;
    let granule = find_granule(doc.root_element())?;

    let datastrip_id = granule
        .attribute("datastripIdentifier")
        .ok_or(MetadataError::MissingAttribute("datastripIdentifier"))?;
    let granule_id = granule
        .attribute("granuleIdentifier")
        .ok_or(MetadataError::MissingAttribute("granuleIdentifier"))?;

    Ok(ProductMetadata {
        granule: parse_granule(granule_id)?,
        datastrip: parse_datastrip(datastrip_id)?,
    })
}

fn find_granule<'a, 'input>(root: Node<'a, 'input>) -> Result<Node<'a, 'input>, MetadataError> {
    let mut node = root;
    for (depth, name) in GRANULE_PATH.iter().enumerate() {
        node = node
            .children()
            .find(|n| n.has_tag_name(*name))
            .ok_or_else(|| MetadataError::MissingElement(GRANULE_PATH[..=depth].join("/")))?;
    }
    Ok(node)
}

fn sensing_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{8}T\d{6}$").expect("Regex pattern should always compile"))
}

fn absolute_orbit() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^A\d{6}$").expect("Regex pattern should always compile"))
}

/// `S2A_OPER_DS_2APS_20240505T015750_S20240504T195929_N05.10` -> `20240504T195929`
fn parse_datastrip(value: &str) -> Result<String, MetadataError> {
    let malformed = || MetadataError::MalformedIdentifier {
        attribute: "datastripIdentifier",
        value: value.to_string(),
    };
    let tokens: Vec<&str> = value.split('_').collect();
    if tokens.len() < 2 {
        return Err(malformed());
    }
    let token = tokens[tokens.len() - 2];
    let sensing = token.strip_prefix('S').ok_or_else(malformed)?;
    if !sensing_time().is_match(sensing) {
        return Err(malformed());
    }
    Ok(sensing.to_string())
}

/// `S2A_OPER_MSI_L2A_TL_2APS_20240505T015750_A046314_T08VPH_N05.10` -> `A046314`
fn parse_granule(value: &str) -> Result<String, MetadataError> {
    let malformed = || MetadataError::MalformedIdentifier {
        attribute: "granuleIdentifier",
        value: value.to_string(),
    };
    let tokens: Vec<&str> = value.split('_').collect();
    if tokens.len() < 3 {
        return Err(malformed());
    }
    let token = tokens[tokens.len() - 3];
    if !absolute_orbit().is_match(token) {
        return Err(malformed());
    }
    Ok(token.to_string())
}
