/// Ownership helpers shared by the reconciler and the lifecycle controller.
///
/// The provider inventory is the only store we have: a resource is "ours" if and
/// only if it carries the ownership tag. Everything that interprets tags goes
/// through this module.
use crate::{Filter, Image, InstanceStateName, Tag, Tagged};

pub const OWNERSHIP_TAG_KEY: &str = "cloudrig";
pub const OWNERSHIP_TAG_VALUE: &str = "true";

/// Set by the provider on instances launched by a capacity request.
pub const ASSOCIATION_TAG_KEY: &str = "aws:ec2spot:fleet-request-id";

pub fn ownership_tag() -> Tag {
    Tag::new(OWNERSHIP_TAG_KEY, OWNERSHIP_TAG_VALUE)
}

/// Provider-side filter selecting owned resources.
pub fn ownership_filter() -> Vec<Filter> {
    vec![Filter::tag(&ownership_tag())]
}

/// Ownership filter narrowed to one instance state.
pub fn owned_instances_filter(state: InstanceStateName) -> Vec<Filter> {
    let mut filters = ownership_filter();
    filters.push(Filter::instance_state(state));
    filters
}

/// Return true if `tags` contain the ownership tag (exact key and value).
pub fn is_owned(tags: &[Tag]) -> bool {
    tags.iter()
        .any(|t| t.key == OWNERSHIP_TAG_KEY && t.value == OWNERSHIP_TAG_VALUE)
}

/// Keep only owned resources, preserving provider order.
///
/// Provider filters are applied server side too; this is the local check that
/// makes an untagged resource invisible regardless of what the provider returns.
pub fn owned<T: Tagged>(items: Vec<T>) -> Vec<T> {
    items.into_iter().filter(|i| is_owned(i.tags())).collect()
}

/// Capacity request id recorded on an instance, if any.
///
/// - Blank values are treated as missing
/// - The first association tag wins
pub fn capacity_request_id(tags: &[Tag]) -> Option<&str> {
    tags.iter()
        .find(|t| t.key == ASSOCIATION_TAG_KEY)
        .map(|t| t.value.trim())
        .filter(|v| !v.is_empty())
}

/// Pick the "current" image among owned images.
///
/// Rules:
/// - Untagged images are ignored
/// - Most recent `creation_date` wins; dated images beat undated ones
/// - Ties (or no dates at all) fall back to the greatest `image_id`
///
/// Two tagged images only exist after an interrupted image swap, in which case
/// the newer capture is the one we want.
pub fn select_current_image(images: &[Image]) -> Option<&Image> {
    images
        .iter()
        .filter(|i| is_owned(&i.tags))
        .max_by(|a, b| {
            a.creation_date
                .cmp(&b.creation_date)
                .then_with(|| a.image_id.cmp(&b.image_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn image(id: &str, day: Option<u32>, owned: bool) -> Image {
        Image {
            image_id: id.to_string(),
            name: None,
            creation_date: day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()),
            tags: if owned { vec![ownership_tag()] } else { vec![] },
        }
    }

    #[test]
    fn ownership_requires_exact_value() {
        assert!(is_owned(&[Tag::new("Name", "x"), ownership_tag()]));
        assert!(!is_owned(&[Tag::new("cloudrig", "false")]));
        assert!(!is_owned(&[Tag::new("CloudRig", "true")]));
        assert!(!is_owned(&[]));
    }

    #[test]
    fn owned_drops_untagged_resources() {
        let images = vec![image("ami-a", None, false), image("ami-b", None, true)];
        let kept = owned(images);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].image_id, "ami-b");
    }

    #[test]
    fn association_tag_lookup() {
        let tags = vec![
            ownership_tag(),
            Tag::new(ASSOCIATION_TAG_KEY, "sfr-123"),
        ];
        assert_eq!(capacity_request_id(&tags), Some("sfr-123"));
        assert_eq!(capacity_request_id(&[ownership_tag()]), None);
        assert_eq!(
            capacity_request_id(&[Tag::new(ASSOCIATION_TAG_KEY, "  ")]),
            None
        );
    }

    #[test]
    fn instance_filter_carries_tag_and_state() {
        let f = owned_instances_filter(InstanceStateName::ShuttingDown);
        assert_eq!(f.len(), 2);
        assert_eq!(f[0].name, "tag:cloudrig");
        assert_eq!(f[1].values, vec!["shutting-down".to_string()]);
    }

    #[test]
    fn newest_owned_image_wins() {
        let images = vec![
            image("ami-old", Some(1), true),
            image("ami-new", Some(9), true),
            image("ami-newest-untagged", Some(20), false),
            image("ami-undated", None, true),
        ];
        assert_eq!(select_current_image(&images).unwrap().image_id, "ami-new");
    }

    #[test]
    fn tie_break_is_deterministic() {
        let a = vec![image("ami-1", Some(3), true), image("ami-2", Some(3), true)];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(select_current_image(&a).unwrap().image_id, "ami-2");
        assert_eq!(select_current_image(&b).unwrap().image_id, "ami-2");
        assert!(select_current_image(&[image("ami-x", Some(1), false)]).is_none());
    }
}
