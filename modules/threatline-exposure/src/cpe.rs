use threatline_common::normalize_cpe_component;

pub const CPE_WILDCARD: &str = "*";

/// A parsed CPE 2.3 identity. Fields past `version` are carried verbatim so
/// parse∘serialize is lossless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cpe {
    pub part: String,
    pub vendor: String,
    pub product: String,
    pub version: String,
    /// `update` through `other`, in order.
    pub rest: Vec<String>,
}

/// Parse a `cpe:2.3:...` string. Anything not led by the `cpe:2.3` head is
/// rejected; missing trailing fields read as wildcards.
pub fn parse_cpe(s: &str) -> Option<Cpe> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() < 5 || fields[0] != "cpe" || fields[1] != "2.3" {
        return None;
    }

    let field = |idx: usize| -> String {
        fields
            .get(idx)
            .map(|v| v.to_string())
            .unwrap_or_else(|| CPE_WILDCARD.to_string())
    };

    Some(Cpe {
        part: field(2),
        vendor: field(3),
        product: field(4),
        version: field(5),
        rest: (6..13).map(field).collect(),
    })
}

impl std::fmt::Display for Cpe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cpe:2.3:{}:{}:{}:{}:{}",
            self.part,
            self.vendor,
            self.product,
            self.version,
            self.rest.join(":")
        )
    }
}

/// Build the wildcard CPE pattern for a stack item. Vendor and product are
/// normalized, so casing and whitespace variants of a name collide.
pub fn generate_cpe_pattern(vendor: &str, product: &str) -> String {
    format!(
        "cpe:2.3:a:{}:{}:*:*:*:*:*:*:*:*",
        normalize_cpe_component(vendor),
        normalize_cpe_component(product)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_cpe() {
        let cpe = parse_cpe("cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*").unwrap();
        assert_eq!(cpe.part, "a");
        assert_eq!(cpe.vendor, "fortinet");
        assert_eq!(cpe.product, "fortios");
        assert_eq!(cpe.version, "7.0.0");
    }

    #[test]
    fn rejects_non_cpe23_heads() {
        assert!(parse_cpe("cpe:/a:fortinet:fortios:7.0.0").is_none());
        assert!(parse_cpe("not a cpe").is_none());
        assert!(parse_cpe("cpe:2.3:a").is_none());
    }

    #[test]
    fn parse_serialize_is_lossless_on_head_fields() {
        let raw = "cpe:2.3:a:fortinet:fortios:7.0.0:*:*:*:*:*:*:*";
        let cpe = parse_cpe(raw).unwrap();
        assert_eq!(cpe.to_string(), raw);

        let reparsed = parse_cpe(&cpe.to_string()).unwrap();
        assert_eq!(reparsed.part, cpe.part);
        assert_eq!(reparsed.vendor, cpe.vendor);
        assert_eq!(reparsed.product, cpe.product);
        assert_eq!(reparsed.version, cpe.version);
    }

    #[test]
    fn generate_pattern_normalizes_variants() {
        let a = generate_cpe_pattern("Palo Alto Networks", "PAN-OS");
        let b = generate_cpe_pattern("palo alto  networks", "pan-os");
        assert_eq!(a, b);
        assert_eq!(a, "cpe:2.3:a:palo_alto_networks:pan-os:*:*:*:*:*:*:*:*");
    }
}
