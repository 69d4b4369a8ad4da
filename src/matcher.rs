//! Prefix-with-wildcard matching over dotted label sequences.

/// Decide whether `query` is a potential prefix query for `name`.
///
/// Both inputs are label sequences in natural (root-last) order. Walking both
/// right-to-left in lockstep, every overlapping position must either be equal
/// or the query label must be `*`, which stands for exactly one label. The
/// walk stops when either side is exhausted, so a query *longer* than the
/// name is still a valid prefix query for it.
///
/// Examples:
///
/// - `foo.bar.baz.qux` matches `bar.baz.qux` (longer prefix is okay)
/// - `foo.*.baz.qux` matches `bar.baz.qux` (wildcards okay)
/// - `*.baz.qux` matches `baz.baz.qux` (wildcard prefix okay)
pub fn is_prefix_query(query: &[&str], name: &[&str]) -> bool {
    let mut i = query.len();
    let mut j = name.len();

    while i > 0 && j > 0 {
        i -= 1;
        j -= 1;
        if query[i] != name[j] && query[i] != "*" {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(s: &str) -> Vec<&str> {
        if s.is_empty() {
            Vec::new()
        } else {
            s.split('.').collect()
        }
    }

    fn matches(query: &str, name: &str) -> bool {
        is_prefix_query(&labels(query), &labels(name))
    }

    #[test]
    fn test_exact_and_suffix_matches() {
        assert!(matches("docker", "docker"));
        assert!(matches("bar.docker", "foo.bar.docker"));
        assert!(matches("foo.bar.docker", "foo.bar.docker"));
        assert!(!matches("foo.docker", "foo.bar.docker"));
        assert!(!matches("baz.docker", "foo.bar.docker"));
    }

    #[test]
    fn test_longer_query_still_matches() {
        assert!(matches("foo.bar.baz.qux", "bar.baz.qux"));
        assert!(matches("baz.foo.bar.docker.local", "foo.bar.docker.local"));
    }

    #[test]
    fn test_wildcard_matches_one_label_anywhere() {
        assert!(matches("foo.*.baz.qux", "foo.bar.baz.qux"));
        assert!(matches("*.baz.qux", "baz.baz.qux"));
        assert!(matches("bar.*.local", "foo.bar.docker.local"));
        assert!(!matches("foo.*.local", "foo.bar.docker.local"));
        assert!(!matches("bar.*.docker.local", "foo.bar.docker.local"));
    }

    #[test]
    fn test_empty_query_matches_anything() {
        assert!(matches("", "foo.bar.docker"));
        assert!(matches("", ""));
    }

    #[test]
    fn test_left_prepending_preserves_a_match() {
        // any labels prepended to a matching query keep it matching
        let cases = [("bar.docker", "foo.bar.docker"), ("docker", "docker")];
        for (query, name) in cases {
            assert!(matches(query, name));
            for prefix in ["extra", "a.b.c", "*"] {
                assert!(
                    matches(&format!("{prefix}.{query}"), name),
                    "{prefix}.{query} should still match {name}"
                );
            }
        }
    }

    #[test]
    fn test_all_wildcards_match_same_length_name() {
        for name in ["docker", "foo.bar", "a.b.c.d"] {
            let name_labels = labels(name);
            let stars = vec!["*"; name_labels.len()];
            assert!(is_prefix_query(&stars, &name_labels), "{name}");
        }
    }
}
