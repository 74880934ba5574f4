use crate::tags::Tags;
use interner::{intern, Symbol};
use lazy_static::lazy_static;

const MAX_KEY_LENGTH: usize = 60;
const MAX_VALUE_LENGTH: usize = 120;
const MAX_USER_TAGS: usize = 20;
const MAX_NAME_LENGTH: usize = 255;

lazy_static! {
    static ref VALID_NF_TAGS: Vec<Symbol> = [
        "nf.node",
        "nf.cluster",
        "nf.app",
        "nf.asg",
        "nf.stack",
        "nf.ami",
        "nf.vmtype",
        "nf.zone",
        "nf.region",
        "nf.account",
        "nf.country",
        "nf.task",
        "nf.country.rollup",
    ]
    .iter()
    .map(|s| intern(s))
    .collect();
    static ref DSTYPE: Symbol = intern("atlas.dstype");
    static ref LEGACY: Symbol = intern("atlas.legacy");
    static ref NAME: Symbol = intern("name");
}

fn is_key_restricted(k: Symbol) -> bool {
    k.as_str().starts_with("nf.") || k.as_str().starts_with("atlas.")
}

fn is_user_key_invalid(k: Symbol) -> bool {
    if k.as_str().starts_with("atlas.") {
        return k != *DSTYPE && k != *LEGACY;
    }
    if k.as_str().starts_with("nf.") {
        return !VALID_NF_TAGS.contains(&k);
    }
    false
}

/// Check the validity rules for a tag set destined for publication:
/// a `name` tag of sane length, per-tag length limits, no keys squatting on
/// the reserved namespaces, and a bounded number of user tags.
pub fn is_valid(tags: &Tags) -> bool {
    match validate(tags) {
        Ok(()) => true,
        Err(reason) => {
            tracing::warn!(%reason, "invalid metric tags");
            false
        }
    }
}

fn validate(tags: &Tags) -> Result<(), String> {
    let mut user_tags = 0usize;
    let mut name_seen = false;

    for &(k, v) in tags.iter() {
        if k.is_empty() || v.is_empty() {
            return Err("tag keys or values cannot be empty".to_owned());
        }

        if k == *NAME {
            name_seen = true;
            user_tags += 1;
            if v.len() > MAX_NAME_LENGTH {
                return Err(format!(
                    "value for name exceeds length limit ({} > {})",
                    v.len(),
                    MAX_NAME_LENGTH
                ));
            }
            continue;
        }

        if k.len() > MAX_KEY_LENGTH || v.len() > MAX_VALUE_LENGTH {
            return Err(format!(
                "tag {}={} exceeds length limits (key {} > {} or value {} > {})",
                k,
                v,
                k.len(),
                MAX_KEY_LENGTH,
                v.len(),
                MAX_VALUE_LENGTH
            ));
        }

        if !is_key_restricted(k) {
            user_tags += 1;
        }

        if is_user_key_invalid(k) {
            return Err(format!("{} is using a reserved namespace", k));
        }
    }

    if user_tags > MAX_USER_TAGS {
        return Err(format!(
            "too many user tags ({} > {})",
            user_tags, MAX_USER_TAGS
        ));
    }

    if !name_seen {
        return Err("name is a required tag".to_owned());
    }

    Ok(())
}

const fn charset(group: bool) -> [bool; 128] {
    let mut allowed = [false; 128];
    allowed[b'.' as usize] = true;
    allowed[b'-' as usize] = true;
    allowed[b'_' as usize] = true;

    let mut ch = b'0';
    while ch <= b'9' {
        allowed[ch as usize] = true;
        ch += 1;
    }
    let mut ch = b'a';
    while ch <= b'z' {
        allowed[ch as usize] = true;
        ch += 1;
    }
    let mut ch = b'A';
    while ch <= b'Z' {
        allowed[ch as usize] = true;
        ch += 1;
    }

    if group {
        allowed[b'^' as usize] = true;
        allowed[b'~' as usize] = true;
    }
    allowed
}

const CHARS_ALLOWED: [bool; 128] = charset(false);
const GROUP_CHARS_ALLOWED: [bool; 128] = charset(true);

fn sanitize(table: &[bool; 128], s: Symbol) -> Symbol {
    let text = s.as_str();
    if text
        .bytes()
        .all(|b| (b as usize) < 128 && table[b as usize])
    {
        return s;
    }
    let cleaned: String = text
        .bytes()
        .map(|b| {
            if (b as usize) < 128 && table[b as usize] {
                b as char
            } else {
                '_'
            }
        })
        .collect();
    intern(&cleaned)
}

/// Replace characters outside the publishable charset with `_`.
pub fn to_valid_charset(s: Symbol) -> Symbol {
    sanitize(&CHARS_ALLOWED, s)
}

lazy_static! {
    static ref ASG: Symbol = intern("nf.asg");
    static ref CLUSTER: Symbol = intern("nf.cluster");
}

/// Sanitize a tag value. Values for the group keys `nf.asg` and
/// `nf.cluster` additionally allow `^` and `~`.
pub fn encode_value_for_key(value: Symbol, key: Symbol) -> Symbol {
    if key == *ASG || key == *CLUSTER {
        sanitize(&GROUP_CHARS_ALLOWED, value)
    } else {
        sanitize(&CHARS_ALLOWED, value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn with_name(mut tags: Tags) -> Tags {
        tags.add_str("name", "metric");
        tags
    }

    #[test]
    fn requires_name() {
        assert!(!is_valid(&Tags::new()));
        assert!(is_valid(&with_name(Tags::new())));
    }

    #[test]
    fn rejects_unknown_reserved_keys() {
        let tags = with_name(vec![("nf.unknown", "v")].into());
        assert!(!is_valid(&tags));

        let tags = with_name(vec![("nf.cluster", "c")].into());
        assert!(is_valid(&tags));

        let tags = with_name(vec![("atlas.dstype", "gauge")].into());
        assert!(is_valid(&tags));

        let tags = with_name(vec![("atlas.other", "x")].into());
        assert!(!is_valid(&tags));
    }

    #[test]
    fn enforces_length_limits() {
        let long_name: String = std::iter::repeat('a').take(256).collect();
        let mut tags = Tags::new();
        tags.add_str("name", &long_name);
        assert!(!is_valid(&tags));

        let long_key: String = std::iter::repeat('k').take(61).collect();
        let tags = with_name(vec![(long_key.as_str(), "v")].into());
        assert!(!is_valid(&tags));

        let long_value: String = std::iter::repeat('v').take(121).collect();
        let tags = with_name(vec![("k", long_value.as_str())].into());
        assert!(!is_valid(&tags));
    }

    #[test]
    fn limits_user_tags() {
        let mut tags = Tags::new();
        tags.add_str("name", "metric");
        for i in 0..20 {
            tags.add_str(&format!("k{}", i), "v");
        }
        // name + 20 user tags exceeds the limit.
        assert!(!is_valid(&tags));

        let mut tags = Tags::new();
        tags.add_str("name", "metric");
        for i in 0..19 {
            tags.add_str(&format!("k{}", i), "v");
        }
        assert!(is_valid(&tags));
    }

    #[test]
    fn sanitizes_characters() {
        assert_eq!(
            to_valid_charset(intern("foo bar/baz")).as_str(),
            "foo_bar_baz"
        );
        assert_eq!(to_valid_charset(intern("ok.name-1_x")).as_str(), "ok.name-1_x");

        let key = intern("nf.asg");
        assert_eq!(
            encode_value_for_key(intern("app-v001^2"), key).as_str(),
            "app-v001^2"
        );
        assert_eq!(
            encode_value_for_key(intern("app-v001^2"), intern("other")).as_str(),
            "app-v001_2"
        );
    }
}
