use tempo_proto::{BlockId, TenantId};

/// Object-store layout, exactly as spec'd:
/// `<tenant>/index.json`, `<tenant>/<blockID>/data`, `<tenant>/<blockID>/meta.json`.
pub fn tenant_index_key(tenant: &TenantId) -> String {
    format!("{}/index.json", tenant.as_str())
}

pub fn block_data_key(tenant: &TenantId, block: BlockId) -> String {
    format!("{}/{}/data", tenant.as_str(), block)
}

pub fn block_meta_key(tenant: &TenantId, block: BlockId) -> String {
    format!("{}/{}/meta.json", tenant.as_str(), block)
}

pub fn block_prefix(tenant: &TenantId) -> String {
    format!("{}/", tenant.as_str())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keys_match_spec_layout() {
        let tenant = TenantId::new("acme").unwrap();
        let block = BlockId::new();
        assert_eq!(tenant_index_key(&tenant), "acme/index.json");
        assert_eq!(block_data_key(&tenant, block), format!("acme/{}/data", block));
        assert_eq!(
            block_meta_key(&tenant, block),
            format!("acme/{}/meta.json", block)
        );
    }
}
