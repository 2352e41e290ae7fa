use regex::Regex;
use regrade_storage::ClassId;
use std::collections::{BTreeMap, HashMap};

/// The slugs a class has for one dependency kind, with their ids.
#[derive(Debug, Default, Clone)]
pub struct SlugUniverse {
    classes: HashMap<ClassId, BTreeMap<String, i64>>,
}

impl SlugUniverse {
    pub fn contains_class(&self, class_id: ClassId) -> bool {
        self.classes.contains_key(&class_id)
    }

    pub fn insert_class(&mut self, class_id: ClassId, entries: BTreeMap<String, i64>) {
        self.classes.insert(class_id, entries);
    }

    /// Matches `glob` against the class's slugs. `*` matches any run of characters, everything
    /// else matches literally and case-sensitively, and the whole slug must match. The result is
    /// sorted.
    pub fn expand(&self, glob: &str, class_id: ClassId) -> Vec<String> {
        let slugs = match self.classes.get(&class_id) {
            Some(slugs) => slugs,
            None => return vec![],
        };

        let pattern = format!(
            "^{}$",
            glob.split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        );

        match Regex::new(&pattern) {
            Ok(regex) => slugs
                .keys()
                .filter(|slug| regex.is_match(slug))
                .cloned()
                .collect(),
            Err(e) => {
                tracing::warn!(glob, error = %e, "could not expand glob");
                vec![]
            }
        }
    }

    /// Slugs of the given ids, in the order given. Unknown ids are skipped.
    pub fn slugs_for(&self, class_id: ClassId, ids: &[i64]) -> Vec<String> {
        let slugs = match self.classes.get(&class_id) {
            Some(slugs) => slugs,
            None => return vec![],
        };

        ids.iter()
            .filter_map(|id| {
                slugs
                    .iter()
                    .find(|(_, slug_id)| *slug_id == id)
                    .map(|(slug, _)| slug.clone())
            })
            .collect()
    }

    /// Ids of the given slugs, in the order given. Unknown slugs are skipped.
    pub fn ids_for(&self, class_id: ClassId, slugs: &[String]) -> Vec<i64> {
        match self.classes.get(&class_id) {
            Some(known) => slugs.iter().filter_map(|slug| known.get(slug).copied()).collect(),
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn universe() -> SlugUniverse {
        let mut universe = SlugUniverse::default();
        universe.insert_class(
            1,
            vec![("hw2", 12), ("hw1", 11), ("HW3", 13), ("quiz.1", 20), ("hw10", 14)]
                .into_iter()
                .map(|(slug, id)| (slug.to_string(), id))
                .collect(),
        );
        universe
    }

    #[test]
    fn glob_matches_whole_slug_sorted() {
        assert_eq!(universe().expand("hw*", 1), vec!["hw1", "hw10", "hw2"]);
        assert_eq!(universe().expand("*1", 1), vec!["hw1", "quiz.1"]);
        assert_eq!(universe().expand("hw1", 1), vec!["hw1"]);
    }

    #[test]
    fn glob_is_literal_apart_from_star() {
        assert_eq!(universe().expand("quiz?1", 1), Vec::<String>::new());
        assert_eq!(universe().expand("quiz.*", 1), vec!["quiz.1"]);
    }

    #[test]
    fn unknown_class_or_no_match_is_empty() {
        assert!(universe().expand("hw*", 2).is_empty());
        assert!(universe().expand("lab*", 1).is_empty());
    }

    #[test]
    fn ids_and_slugs_keep_request_order() {
        assert_eq!(universe().ids_for(1, &["hw2".into(), "nope".into(), "hw1".into()]), vec![12, 11]);
        assert_eq!(universe().slugs_for(1, &[13, 99, 11]), vec!["HW3", "hw1"]);
    }
}
