//! Weekly batch distribution planner (§4.5).
//!
//! Algorithm: greedy by priority (lowest number first), then round-robin by
//! section, then fill remaining days. Per-section weekly quotas default to
//! the canonical set from §4.5 and are overridable via
//! `distro_config::SchedulerConfig.batch_rules`, each entry formatted
//! `section:min:max`.

use std::collections::BTreeMap;

use distro_types::ContentItem;

const DAYS_PER_WEEK: usize = 7;

#[derive(Debug, Clone, Copy)]
pub struct SectionQuota {
    pub min: usize,
    pub max: usize,
}

/// The canonical per-section quotas from §4.5, used when configuration
/// doesn't override them.
pub fn default_quotas() -> BTreeMap<String, SectionQuota> {
    [
        ("breathscape", SectionQuota { min: 2, max: 3 }),
        ("hardware", SectionQuota { min: 1, max: 2 }),
        ("tips", SectionQuota { min: 1, max: 2 }),
        ("vision", SectionQuota { min: 0, max: 1 }),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Parses `batch_rules` entries of the form `section:min:max`, falling back
/// to the canonical defaults for any section a rule doesn't mention.
pub fn quotas_from_rules(rules: &[String]) -> BTreeMap<String, SectionQuota> {
    let mut quotas = default_quotas();
    for rule in rules {
        let parts: Vec<&str> = rule.split(':').collect();
        if let [section, min, max] = parts[..] {
            if let (Ok(min), Ok(max)) = (min.parse(), max.parse()) {
                quotas.insert(section.to_string(), SectionQuota { min, max });
            }
        }
    }
    quotas
}

/// A single planned placement: which day (0-indexed within the week) an
/// item lands on.
#[derive(Debug, Clone)]
pub struct Placement {
    pub content_id: String,
    pub section: String,
    pub day: usize,
}

/// An item with the section metadata the planner needs; `ContentItem`
/// carries section as a `metadata["section"]` entry rather than a first
/// class field.
pub struct PlannableItem<'a> {
    pub item: &'a ContentItem,
    pub section: String,
}

pub fn section_of(item: &ContentItem) -> String {
    item.metadata
        .get("section")
        .cloned()
        .unwrap_or_else(|| "uncategorized".to_string())
}

/// Builds a weekly plan: sorts by priority ascending, then round-robins
/// across days by section, respecting per-section max and avoiding two
/// items of the same section landing on the same day. Items beyond what
/// quotas/day slots allow are left unplaced and returned separately so
/// callers can decide whether to carry them to next week.
pub fn plan_week<'a>(
    items: &[PlannableItem<'a>],
    quotas: &BTreeMap<String, SectionQuota>,
) -> (Vec<Placement>, Vec<&'a ContentItem>) {
    let mut sorted: Vec<&PlannableItem<'a>> = items.iter().collect();
    sorted.sort_by_key(|p| p.item.priority);

    let mut day_sections: Vec<Vec<String>> = vec![Vec::new(); DAYS_PER_WEEK];
    let mut section_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut placements = Vec::new();
    let mut unplaced = Vec::new();

    for entry in sorted {
        let section = entry.section.clone();
        let max = quotas.get(&section).map(|q| q.max).unwrap_or(usize::MAX);
        let used = *section_counts.get(&section).unwrap_or(&0);
        if used >= max {
            unplaced.push(entry.item);
            continue;
        }

        let day = (0..DAYS_PER_WEEK).find(|&d| !day_sections[d].contains(&section));
        match day {
            Some(day) => {
                day_sections[day].push(section.clone());
                *section_counts.entry(section.clone()).or_insert(0) += 1;
                placements.push(Placement {
                    content_id: entry.item.id.clone(),
                    section,
                    day,
                });
            }
            None => unplaced.push(entry.item),
        }
    }

    (placements, unplaced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use distro_types::ContentKind;
    use std::collections::BTreeMap as Map;

    fn item(id: &str, priority: u8, section: &str) -> ContentItem {
        let mut metadata = Map::new();
        metadata.insert("section".to_string(), section.to_string());
        ContentItem {
            kind: ContentKind::Update,
            id: id.into(),
            title: id.into(),
            body: "b".into(),
            published: true,
            featured: false,
            priority,
            channels: vec![],
            scheduled_for: None,
            template: None,
            tone: None,
            tags: vec![],
            metadata,
            reading_time_minutes: None,
        }
    }

    #[test]
    fn same_section_never_lands_on_same_day_twice() {
        let items = vec![item("a", 1, "hardware"), item("b", 1, "hardware")];
        let plannable: Vec<PlannableItem> = items
            .iter()
            .map(|i| PlannableItem { item: i, section: section_of(i) })
            .collect();
        let (placements, _) = plan_week(&plannable, &default_quotas());
        let days: Vec<usize> = placements.iter().map(|p| p.day).collect();
        assert_eq!(days.len(), 2);
        assert_ne!(days[0], days[1]);
    }

    #[test]
    fn exceeding_section_max_leaves_items_unplaced() {
        let items = vec![
            item("a", 1, "vision"),
            item("b", 1, "vision"),
        ];
        let plannable: Vec<PlannableItem> = items
            .iter()
            .map(|i| PlannableItem { item: i, section: section_of(i) })
            .collect();
        let (placements, unplaced) = plan_week(&plannable, &default_quotas());
        assert_eq!(placements.len(), 1);
        assert_eq!(unplaced.len(), 1);
    }

    #[test]
    fn lower_priority_number_is_placed_first_when_capacity_constrained() {
        let items = vec![item("low-pri", 5, "vision"), item("high-pri", 1, "vision")];
        let plannable: Vec<PlannableItem> = items
            .iter()
            .map(|i| PlannableItem { item: i, section: section_of(i) })
            .collect();
        let (placements, _) = plan_week(&plannable, &default_quotas());
        assert_eq!(placements[0].content_id, "high-pri");
    }

    #[test]
    fn quotas_from_rules_overrides_defaults() {
        let rules = vec!["vision:2:4".to_string()];
        let quotas = quotas_from_rules(&rules);
        assert_eq!(quotas["vision"].max, 4);
        assert_eq!(quotas["hardware"].max, 2);
    }
}
