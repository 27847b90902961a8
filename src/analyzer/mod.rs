//! Static analysis of generated Python candidates.
//!
//! Parses candidate source into a function table, import list, referenced
//! module set and inter-function dependency set. The dependency scan records
//! every call whose callee is a plain identifier, then discards locally
//! defined function names and imported names, so recursion and private
//! helpers are never flagged as missing dependencies.

mod builtins;

pub use builtins::is_builtin;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::error::CoreError;

/// A function definition found in candidate source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    /// Full text of the definition (including decorators).
    pub body: String,
    /// Whether the immediate enclosing scope is the module itself.
    pub is_top_level: bool,
}

/// Result of analyzing one source text.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub functions: Vec<FunctionInfo>,
    pub import_statements: Vec<String>,
    pub imported_modules: BTreeSet<String>,
    /// Names bound into scope by import statements.
    pub imported_names: BTreeSet<String>,
    /// Call targets that are neither builtins, local functions nor imports.
    pub dependency_names: BTreeSet<String>,
}

/// A validated candidate implementation produced from oracle output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Accepted code (raw or rebuilt from the tree, per policy).
    pub code: String,
    /// Name of the primary (last top-level) function, empty if none.
    pub fn_name: String,
    pub dependency_names: BTreeSet<String>,
    /// The oracle output the candidate was parsed from.
    pub raw_output: String,
    pub is_top_level: bool,
}

/// Validation policy applied to candidates, configurable per deployment.
#[derive(Debug, Clone)]
pub struct AnalyzerPolicy {
    /// Reject candidates importing modules outside `allowed_modules`.
    pub check_imports: bool,
    /// Reject candidates that define no functions.
    pub require_functions: bool,
    /// Rebuild accepted code as imports + top-level function bodies,
    /// discarding any other top-level statements.
    pub rebuild_from_tree: bool,
    pub allowed_modules: BTreeSet<String>,
}

impl Default for AnalyzerPolicy {
    fn default() -> Self {
        Self {
            check_imports: true,
            require_functions: true,
            rebuild_from_tree: true,
            allowed_modules: default_allowed_modules(),
        }
    }
}

/// Standard-library modules candidates may import unless overridden.
pub fn default_allowed_modules() -> BTreeSet<String> {
    [
        "bisect",
        "collections",
        "copy",
        "datetime",
        "decimal",
        "fractions",
        "functools",
        "heapq",
        "itertools",
        "json",
        "math",
        "operator",
        "random",
        "re",
        "statistics",
        "string",
        "typing",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn python_parser() -> Result<Parser, CoreError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| CoreError::Parse(format!("python grammar unavailable: {e}")))?;
    Ok(parser)
}

fn node_text(node: Node<'_>, src: &str) -> String {
    node.utf8_text(src.as_bytes()).unwrap_or("").to_string()
}

/// Locate the first error or missing node for a readable parse diagnostic.
fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(found) = first_error(child) {
            return Some(found);
        }
    }
    Some(node)
}

struct Scan<'a> {
    src: &'a str,
    functions: Vec<FunctionInfo>,
    import_statements: Vec<String>,
    imported_modules: BTreeSet<String>,
    imported_names: BTreeSet<String>,
    call_targets: BTreeSet<String>,
}

impl<'a> Scan<'a> {
    fn visit(&mut self, node: Node<'_>) {
        match node.kind() {
            "function_definition" => self.visit_function(node),
            "import_statement" => {
                self.import_statements.push(node_text(node, self.src));
                self.visit_plain_import(node);
                return;
            }
            "import_from_statement" | "future_import_statement" => {
                self.import_statements.push(node_text(node, self.src));
                self.visit_from_import(node);
                return;
            }
            "call" => {
                if let Some(callee) = node.child_by_field_name("function") {
                    if callee.kind() == "identifier" {
                        let name = node_text(callee, self.src);
                        if !is_builtin(&name) {
                            self.call_targets.insert(name);
                        }
                    }
                }
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.visit(child);
        }
    }

    fn visit_function(&mut self, node: Node<'_>) {
        let name = node
            .child_by_field_name("name")
            .map(|n| node_text(n, self.src))
            .unwrap_or_default();

        // Decorators live on a wrapping node; body text and the scope check
        // both look through it.
        let mut scope_parent = node.parent();
        let mut body_node = node;
        if let Some(parent) = scope_parent {
            if parent.kind() == "decorated_definition" {
                body_node = parent;
                scope_parent = parent.parent();
            }
        }
        let is_top_level = scope_parent.map(|p| p.kind() == "module").unwrap_or(false);

        self.functions.push(FunctionInfo {
            name,
            body: node_text(body_node, self.src),
            is_top_level,
        });
    }

    /// `import a, b.c as d`: module roots plus the names bound in scope.
    fn visit_plain_import(&mut self, node: Node<'_>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => {
                    let path = node_text(child, self.src);
                    if let Some(root) = path.split('.').next() {
                        self.imported_modules.insert(root.to_string());
                        self.imported_names.insert(root.to_string());
                    }
                }
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        let path = node_text(name, self.src);
                        if let Some(root) = path.split('.').next() {
                            self.imported_modules.insert(root.to_string());
                        }
                    }
                    if let Some(alias) = child.child_by_field_name("alias") {
                        self.imported_names.insert(node_text(alias, self.src));
                    }
                }
                _ => {}
            }
        }
    }

    /// `from m import a, b as c`: module root plus every imported name.
    fn visit_from_import(&mut self, node: Node<'_>) {
        let module_node = node.child_by_field_name("module_name");
        if let Some(module) = module_node {
            let path = node_text(module, self.src);
            // Relative imports (`from . import x`) carry no top module.
            let trimmed = path.trim_start_matches('.');
            if let Some(root) = trimmed.split('.').next() {
                if !root.is_empty() {
                    self.imported_modules.insert(root.to_string());
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if Some(child) == module_node {
                continue;
            }
            match child.kind() {
                "dotted_name" => {
                    self.imported_names.insert(node_text(child, self.src));
                }
                "aliased_import" => {
                    if let Some(alias) = child.child_by_field_name("alias") {
                        self.imported_names.insert(node_text(alias, self.src));
                    }
                }
                _ => {}
            }
        }
    }
}

/// Extract functions, imports and the dependency set from source text.
pub fn analyze(code: &str) -> Result<Analysis, CoreError> {
    let mut parser = python_parser()?;
    let tree = parser
        .parse(code, None)
        .ok_or_else(|| CoreError::Parse("parser returned no tree".to_string()))?;
    let root = tree.root_node();

    if root.has_error() {
        let detail = first_error(root)
            .map(|n| {
                let pos = n.start_position();
                format!("syntax error at line {}, column {}", pos.row + 1, pos.column + 1)
            })
            .unwrap_or_else(|| "syntax error".to_string());
        return Err(CoreError::Parse(detail));
    }

    let mut scan = Scan {
        src: code,
        functions: Vec::new(),
        import_statements: Vec::new(),
        imported_modules: BTreeSet::new(),
        imported_names: BTreeSet::new(),
        call_targets: BTreeSet::new(),
    };
    scan.visit(root);

    let mut dependency_names = scan.call_targets;
    for function in &scan.functions {
        dependency_names.remove(&function.name);
    }
    for imported in &scan.imported_names {
        dependency_names.remove(imported);
    }

    Ok(Analysis {
        functions: scan.functions,
        import_statements: scan.import_statements,
        imported_modules: scan.imported_modules,
        imported_names: scan.imported_names,
        dependency_names,
    })
}

/// Check that every referenced module is allow-listed.
pub fn assert_modules_allowed(
    imported_modules: &BTreeSet<String>,
    allowed: &BTreeSet<String>,
) -> Result<(), CoreError> {
    for module in imported_modules {
        if !allowed.contains(module) {
            return Err(CoreError::Policy(format!(
                "module {module} is not allowed. try again without this module"
            )));
        }
    }
    Ok(())
}

/// Name of the last function defined in `code`.
pub fn primary_fn_name(code: &str) -> Result<String, CoreError> {
    let analysis = analyze(code)?;
    analysis
        .functions
        .last()
        .map(|f| f.name.clone())
        .ok_or_else(|| CoreError::Policy("no function definition found".to_string()))
}

/// The call expression tested by a single-line assert statement: the left
/// side of its comparison, or the whole test expression when there is no
/// comparison.
pub fn call_str(assert_stmt: &str) -> Result<String, CoreError> {
    let mut parser = python_parser()?;
    let tree = parser
        .parse(assert_stmt, None)
        .ok_or_else(|| CoreError::Parse("parser returned no tree".to_string()))?;

    fn find_assert<'a>(node: Node<'a>) -> Option<Node<'a>> {
        if node.kind() == "assert_statement" {
            return Some(node);
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if let Some(found) = find_assert(child) {
                return Some(found);
            }
        }
        None
    }

    let assert_node = find_assert(tree.root_node()).ok_or_else(|| {
        CoreError::Policy(format!("invalid assert statement: {assert_stmt}"))
    })?;
    let test = assert_node.named_child(0).ok_or_else(|| {
        CoreError::Policy(format!("assert statement has no test expression: {assert_stmt}"))
    })?;
    let target = if test.kind() == "comparison_operator" {
        test.named_child(0).unwrap_or(test)
    } else {
        test
    };
    Ok(node_text(target, assert_stmt).trim().to_string())
}

/// Parse oracle output into a validated [`Candidate`].
///
/// When `expected_fn_name` is non-empty the last top-level function must
/// match it exactly; helper functions must precede the main function.
pub fn parse_candidate(
    raw: &str,
    expected_fn_name: &str,
    policy: &AnalyzerPolicy,
) -> Result<Candidate, CoreError> {
    let analysis = analyze(raw)?;

    if policy.check_imports {
        assert_modules_allowed(&analysis.imported_modules, &policy.allowed_modules)?;
    }
    if policy.require_functions && analysis.functions.is_empty() {
        return Err(CoreError::Policy(
            "no functions found. please try again".to_string(),
        ));
    }

    let top_level: Vec<&FunctionInfo> = analysis
        .functions
        .iter()
        .filter(|f| f.is_top_level)
        .collect();
    let fn_name = top_level.last().map(|f| f.name.clone()).unwrap_or_default();

    let mut is_top_level = false;
    if !expected_fn_name.is_empty() {
        if policy.require_functions {
            if top_level.is_empty() {
                return Err(CoreError::Policy(
                    "could not find any top-level function (one not nested in another scope)"
                        .to_string(),
                ));
            }
            if fn_name != expected_fn_name {
                return Err(CoreError::Policy(format!(
                    "expected main function name {expected_fn_name} but got function name \
                     {fn_name}, try again. Your response should declare helper functions \
                     first, then the main function last."
                )));
            }
            is_top_level = true;
        } else {
            is_top_level = find_expected_fn(&analysis.functions, expected_fn_name)?;
        }
    }

    let code = if policy.rebuild_from_tree {
        let mut parts = Vec::new();
        if !analysis.import_statements.is_empty() {
            parts.push(analysis.import_statements.join("\n"));
        }
        parts.extend(top_level.iter().map(|f| f.body.clone()));
        parts.join("\n\n")
    } else {
        raw.to_string()
    };

    Ok(Candidate {
        code,
        fn_name,
        dependency_names: analysis.dependency_names,
        raw_output: raw.to_string(),
        is_top_level,
    })
}

/// Look up the expected function when top-level enforcement is off (it may
/// be nested, e.g. inside a class).
fn find_expected_fn(functions: &[FunctionInfo], expected: &str) -> Result<bool, CoreError> {
    for function in functions {
        if function.name == expected {
            return Ok(function.is_top_level);
        }
    }
    Err(CoreError::Policy(format!(
        "could not find any function with the required name {expected}"
    )))
}
