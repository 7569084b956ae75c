//! SAP table key schemas and migration object targets known to the
//! simulation adapter.

/// Parameter table used by `set_parameter` customizing steps.
pub const PARAMETER_TABLE: &str = "TPARA";

/// Key fields per table, in key order.
const TABLE_KEYS: &[(&str, &[&str])] = &[
    // FI
    ("T001", &["BUKRS"]),
    ("T001K", &["BUKRS", "KTOPL"]),
    ("SKA1", &["KTOPL", "SAKNR"]),
    ("SKB1", &["BUKRS", "SAKNR"]),
    ("T003", &["BLART"]),
    ("T007A", &["KALSM", "MWSKZ"]),
    ("T052", &["ZTERM"]),
    // CO
    ("CSKS", &["KOKRS", "KOSTL"]),
    ("CEPC", &["KOKRS", "PRCTR"]),
    ("CSKA", &["KTOPL", "KSTAR"]),
    // MM
    ("T001W", &["WERKS"]),
    ("T001L", &["WERKS", "LGORT"]),
    ("MARA", &["MATNR"]),
    ("MARC", &["MATNR", "WERKS"]),
    ("LFA1", &["LIFNR"]),
    // SD
    ("KNA1", &["KUNNR"]),
    ("TVKO", &["VKORG"]),
    ("TVTW", &["VTWEG"]),
    ("KNVV", &["KUNNR", "VKORG", "VTWEG", "SPART"]),
    // Business partner
    ("BUT000", &["PARTNER"]),
    ("BUT020", &["PARTNER", "ADDRNUMBER"]),
    ("BUT100", &["PARTNER", "RLTYP"]),
    // Basis
    (PARAMETER_TABLE, &["PARAMID"]),
];

/// Migration object id -> target table.
const OBJECT_TABLES: &[(&str, &str)] = &[
    ("BUSINESS_PARTNER", "BUT000"),
    ("CUSTOMER", "KNA1"),
    ("VENDOR", "LFA1"),
    ("MATERIAL", "MARA"),
    ("COST_CENTER", "CSKS"),
    ("PROFIT_CENTER", "CEPC"),
    ("GL_ACCOUNT", "SKA1"),
    ("COMPANY_CODE", "T001"),
    ("PLANT", "T001W"),
];

pub fn key_fields(table: &str) -> Option<&'static [&'static str]> {
    TABLE_KEYS
        .iter()
        .find(|(name, _)| *name == table)
        .map(|(_, keys)| *keys)
}

pub fn known_tables() -> impl Iterator<Item = &'static str> {
    TABLE_KEYS.iter().map(|(name, _)| *name)
}

/// Target entity for a migration object; unknown objects load into a table
/// named after themselves.
pub fn object_table(object_id: &str) -> &str {
    OBJECT_TABLES
        .iter()
        .find(|(object, _)| *object == object_id)
        .map(|(_, table)| *table)
        .unwrap_or(object_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_keys_are_ordered() {
        assert_eq!(key_fields("KNVV"), Some(&["KUNNR", "VKORG", "VTWEG", "SPART"][..]));
        assert_eq!(key_fields("ZFOO"), None);
    }

    #[test]
    fn objects_map_to_tables() {
        assert_eq!(object_table("BUSINESS_PARTNER"), "BUT000");
        assert_eq!(object_table("ZLEGACY"), "ZLEGACY");
        assert!(known_tables().any(|t| t == PARAMETER_TABLE));
    }
}
