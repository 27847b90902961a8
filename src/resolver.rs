//! Dependency-closure resolver.
//!
//! Stitches a candidate together with the transitive set of archived skills
//! it calls, producing one executable unit. Emitted order is the reverse of
//! discovery order with the candidate last; names are marked visited before
//! expansion, so dependency cycles terminate.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::library::Skill;

/// Assemble the candidate's code preceded by every transitively required
/// skill body, each appearing exactly once.
///
/// `tables` are consulted in order; the first hit wins. A name missing from
/// all tables is logged and skipped; it only surfaces if the assembled
/// unit later fails to execute.
pub fn assemble_unit(
    candidate_code: &str,
    dependency_names: &BTreeSet<String>,
    tables: &[&BTreeMap<String, Skill>],
) -> String {
    let mut queue: VecDeque<String> = dependency_names.iter().cloned().collect();
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut dependent_code: Vec<String> = Vec::new();

    while let Some(name) = queue.pop_front() {
        if visited.contains(&name) {
            continue;
        }
        let hit = tables.iter().find_map(|table| table.get(&name));
        match hit {
            Some(skill) => {
                dependent_code.push(skill.code.clone());
                visited.insert(name);
                queue.extend(skill.dependencies.iter().cloned());
            }
            None => {
                tracing::warn!("{} is a dependency not found in any skill table", name);
            }
        }
    }

    dependent_code.reverse();
    dependent_code.push(candidate_code.to_string());
    dependent_code.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(code: &str, dependencies: &[&str]) -> Skill {
        Skill {
            code: code.to_string(),
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            task: String::new(),
            description: String::new(),
        }
    }

    fn deps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn chain_assembles_dependencies_first() {
        let mut table = BTreeMap::new();
        table.insert("a".to_string(), skill("def a():\n    return 1", &[]));
        table.insert("b".to_string(), skill("def b():\n    return a()", &["a"]));

        let candidate = "def main_fn():\n    return b()";
        let unit = assemble_unit(candidate, &deps(&["b"]), &[&table]);

        let pos_a = unit.find("def a()").unwrap();
        let pos_b = unit.find("def b()").unwrap();
        let pos_main = unit.find("def main_fn()").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_main);
        assert_eq!(unit.matches("def a()").count(), 1);
        assert_eq!(unit.matches("def b()").count(), 1);
    }

    #[test]
    fn cycle_terminates_with_each_skill_once() {
        let mut table = BTreeMap::new();
        table.insert("a".to_string(), skill("def a():\n    return b()", &["b"]));
        table.insert("b".to_string(), skill("def b():\n    return a()", &["a"]));

        let unit = assemble_unit("def main_fn():\n    return a()", &deps(&["a"]), &[&table]);

        assert_eq!(unit.matches("def a():").count(), 1);
        assert_eq!(unit.matches("def b():").count(), 1);
        assert!(unit.ends_with("def main_fn():\n    return a()"));
    }

    #[test]
    fn missing_dependency_is_skipped() {
        let table: BTreeMap<String, Skill> = BTreeMap::new();
        let unit = assemble_unit("def f():\n    return ghost()", &deps(&["ghost"]), &[&table]);
        assert_eq!(unit, "def f():\n    return ghost()");
    }

    #[test]
    fn first_table_wins() {
        let mut first = BTreeMap::new();
        first.insert("util".to_string(), skill("def util():\n    return 'first'", &[]));
        let mut second = BTreeMap::new();
        second.insert("util".to_string(), skill("def util():\n    return 'second'", &[]));

        let unit = assemble_unit("def f():\n    return util()", &deps(&["util"]), &[&first, &second]);
        assert!(unit.contains("'first'"));
        assert!(!unit.contains("'second'"));
    }

    #[test]
    fn no_dependencies_yields_candidate_only() {
        let table: BTreeMap<String, Skill> = BTreeMap::new();
        let unit = assemble_unit("def f():\n    return 1", &BTreeSet::new(), &[&table]);
        assert_eq!(unit, "def f():\n    return 1");
    }
}
