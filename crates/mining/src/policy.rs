use std::collections::{BTreeMap, BTreeSet};
use veinmine_common::{Material, ToolCategory};

/// Which materials each tool category may cluster-mine.
///
/// Built from configuration; entries whose static tool category does not
/// match the tool they were listed under are dropped with a warning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialPolicy {
    allowed: BTreeMap<ToolCategory, BTreeSet<Material>>,
}

static EMPTY: BTreeSet<Material> = BTreeSet::new();

impl MaterialPolicy {
    pub fn new(allowed: BTreeMap<ToolCategory, BTreeSet<Material>>) -> Self {
        let mut checked: BTreeMap<ToolCategory, BTreeSet<Material>> = BTreeMap::new();
        for (tool, materials) in allowed {
            let set = checked.entry(tool).or_default();
            for material in materials {
                if material.tool_category() == Some(tool) {
                    set.insert(material);
                } else {
                    tracing::warn!(%material, %tool, "material is not harvested by this tool, ignoring");
                }
            }
        }
        Self { allowed: checked }
    }

    pub fn is_allowed(&self, material: Material, tool: ToolCategory) -> bool {
        self.allowed_for(tool).contains(&material)
    }

    /// Allow-list for one tool; empty when the tool has no entry.
    pub fn allowed_for(&self, tool: ToolCategory) -> &BTreeSet<Material> {
        self.allowed.get(&tool).unwrap_or(&EMPTY)
    }

    /// Full per-tool listing, in tool order.
    pub fn allowed_materials(&self) -> &BTreeMap<ToolCategory, BTreeSet<Material>> {
        &self.allowed
    }

    /// The tool this material would be mined with, if it is allowed at all.
    pub fn tool_for(&self, material: Material) -> Option<ToolCategory> {
        let tool = material.tool_category()?;
        self.is_allowed(material, tool).then_some(tool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> MaterialPolicy {
        MaterialPolicy::new(BTreeMap::from([
            (
                ToolCategory::Pickaxe,
                BTreeSet::from([Material::IronOre, Material::OakLog]),
            ),
            (ToolCategory::Axe, BTreeSet::from([Material::OakLog])),
        ]))
    }

    #[test]
    fn mismatched_entries_are_dropped() {
        let p = policy();
        assert!(p.is_allowed(Material::IronOre, ToolCategory::Pickaxe));
        assert!(!p.is_allowed(Material::OakLog, ToolCategory::Pickaxe));
        assert!(p.is_allowed(Material::OakLog, ToolCategory::Axe));
    }

    #[test]
    fn missing_tool_has_empty_list() {
        let p = policy();
        assert!(p.allowed_for(ToolCategory::Hoe).is_empty());
        assert_eq!(p.tool_for(Material::OakLog), Some(ToolCategory::Axe));
        assert_eq!(p.tool_for(Material::GoldOre), None);
    }

    #[test]
    fn listing_is_ordered_by_tool() {
        let p = policy();
        let tools: Vec<_> = p.allowed_materials().keys().copied().collect();
        assert_eq!(tools, vec![ToolCategory::Pickaxe, ToolCategory::Axe]);
    }
}
