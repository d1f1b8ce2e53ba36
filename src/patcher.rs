//! The source patcher (SPEC_FULL.md §4.5): rewrites syntax trees to prepend
//! instrumentation statements and re-serializes them with `prettyplease`.
//!
//! Grounded on `tools/injector.go` in original_source, which builds two
//! `PatchFunc`s (`InjectProfiler`, `InjectProfilerBootstrap`) over
//! `go/ast`. This translation keeps the same two-patch-function shape but
//! expresses the injected statements with `syn::parse_quote!` instead of
//! string-literal `ast.BasicLit` hacks (the original embeds Go source as a
//! string constant because `go/ast` has no statement-literal macro; `syn`
//! does, so the Rust version produces real `syn::Stmt` nodes throughout).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use syn::{Item, ItemFn, ItemMod, ItemUse};

use crate::analyzer::ProfileTarget;
use crate::error::{PrismError, Result};

const PRELUDE_IMPORT: &str = "use prism::prelude::*;";

/// One entry-point patch: the program's `fn main` gets profiler
/// bootstrap/shutdown prepended.
#[derive(Debug, Clone)]
pub struct BootstrapPlan {
    pub entry_file: PathBuf,
    pub entry_fn: String,
    pub profile_dir: String,
    pub profile_label: Option<String>,
}

/// Summary returned after a patch pass: files touched and total patch
/// sites applied (hook sites plus, if present, the bootstrap site).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchSummary {
    pub files_modified: usize,
    pub sites_patched: usize,
}

pub struct Patcher;

impl Patcher {
    pub fn new() -> Self {
        Patcher
    }

    /// Apply profiler hooks to every target in `targets` and, if given, the
    /// bootstrap to the program entry point. Failure at any step -- parse,
    /// patch, or re-serialize -- is fatal for the whole pass: a partially
    /// rewritten project is not a valid observable state.
    pub fn apply(
        &self,
        targets: &[ProfileTarget],
        bootstrap: Option<&BootstrapPlan>,
    ) -> Result<PatchSummary> {
        let mut by_file: HashMap<PathBuf, Vec<&ProfileTarget>> = HashMap::new();
        for target in targets {
            by_file.entry(target.file.clone()).or_default().push(target);
        }
        if let Some(plan) = bootstrap {
            by_file.entry(plan.entry_file.clone()).or_default();
        }

        let mut summary = PatchSummary::default();

        for (file, file_targets) in &by_file {
            let src = std::fs::read_to_string(file)?;
            let mut ast = syn::parse_file(&src).map_err(|source| PrismError::ParseFailure {
                path: file.clone(),
                source,
            })?;

            if already_patched(&ast) {
                return Err(PrismError::PatchFailure {
                    path: file.clone(),
                    reason: "file already contains a prism profiler import".into(),
                });
            }

            let mut sites_in_file = 0usize;
            for target in file_targets {
                let short_name = target.name.rsplit('.').next().unwrap_or(&target.name);
                let patched = patch_fn_by_name(&mut ast.items, short_name, || hook_stmts(target));
                if !patched {
                    return Err(PrismError::PatchFailure {
                        path: file.clone(),
                        reason: format!("could not locate function body for {}", target.name),
                    });
                }
                sites_in_file += 1;
            }

            if let Some(plan) = bootstrap {
                if plan.entry_file == *file {
                    let short_name = plan.entry_fn.clone();
                    let patched = patch_fn_by_name(&mut ast.items, &short_name, || {
                        bootstrap_stmts(plan)
                    });
                    if !patched {
                        return Err(PrismError::PatchFailure {
                            path: file.clone(),
                            reason: format!("could not locate entry function {}", plan.entry_fn),
                        });
                    }
                    sites_in_file += 1;
                }
            }

            ensure_prelude_import(&mut ast.items);

            let rendered = prettyplease::unparse(&ast);
            std::fs::write(file, rendered)?;

            summary.files_modified += 1;
            summary.sites_patched += sites_in_file;
        }

        Ok(summary)
    }
}

impl Default for Patcher {
    fn default() -> Self {
        Patcher::new()
    }
}

fn already_patched(file: &syn::File) -> bool {
    file.items.iter().any(|item| matches!(item, Item::Use(u) if use_renders_to(u, PRELUDE_IMPORT)))
}

fn use_renders_to(item: &ItemUse, expected: &str) -> bool {
    let rendered = prettyplease::unparse(&syn::File {
        shebang: None,
        attrs: vec![],
        items: vec![Item::Use(item.clone())],
    });
    rendered.trim() == expected
}

fn ensure_prelude_import(items: &mut Vec<Item>) {
    let exists = items
        .iter()
        .any(|item| matches!(item, Item::Use(u) if use_renders_to(u, PRELUDE_IMPORT)));
    if !exists {
        let use_item: Item = syn::parse_quote!(use prism::prelude::*;);
        items.insert(0, use_item);
    }
}

/// Recursively locate `fn_name` among `items` (including nested `mod { .. }`
/// blocks and `impl` blocks, mirroring the analyzer's own traversal) and
/// prepend the statements `make_stmts` produces to its body.
fn patch_fn_by_name(
    items: &mut [Item],
    fn_name: &str,
    make_stmts: impl Fn() -> Vec<syn::Stmt>,
) -> bool {
    for item in items.iter_mut() {
        match item {
            Item::Fn(ItemFn { sig, block, .. }) if sig.ident == fn_name => {
                let mut new_stmts = make_stmts();
                new_stmts.append(&mut block.stmts);
                block.stmts = new_stmts;
                return true;
            }
            Item::Mod(ItemMod {
                content: Some((_, nested)),
                ..
            }) => {
                if patch_fn_by_name(nested, fn_name, &make_stmts) {
                    return true;
                }
            }
            Item::Impl(item_impl) => {
                for impl_item in &mut item_impl.items {
                    if let syn::ImplItem::Fn(method) = impl_item {
                        if method.sig.ident == fn_name {
                            let mut new_stmts = make_stmts();
                            new_stmts.append(&mut method.block.stmts);
                            method.block.stmts = new_stmts;
                            return true;
                        }
                    }
                }
            }
            _ => {}
        }
    }
    false
}

/// The "profiler hook" `PatchFn`: depth 0 gets `begin_profile`/a guard that
/// calls `end_profile`, depth > 0 gets `enter`/a guard that calls `leave`.
fn hook_stmts(target: &ProfileTarget) -> Vec<syn::Stmt> {
    let name = &target.name;
    if target.depth == 0 {
        vec![
            syn::parse_quote!(begin_profile(#name);),
            syn::parse_quote!(let __prism_guard = end_profile_guard();),
        ]
    } else {
        vec![
            syn::parse_quote!(enter(#name);),
            syn::parse_quote!(let __prism_guard = leave_guard();),
        ]
    }
}

/// The "bootstrap" `PatchFn`: inserted at the program entry function.
fn bootstrap_stmts(plan: &BootstrapPlan) -> Vec<syn::Stmt> {
    let dir = &plan.profile_dir;
    let label = plan.profile_label.clone().unwrap_or_default();
    vec![
        syn::parse_quote!(init(FileSink::new(#dir), #label).expect("profiler init failed");),
        syn::parse_quote!(let __prism_shutdown = shutdown_guard();),
    ]
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{content}").unwrap();
        path
    }

    #[test]
    fn patches_root_target_and_nested_call() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "src/lib.rs",
            r#"
                fn f() { g(); }
                fn g() {}
                fn main() { f(); }
            "#,
        );

        let targets = vec![
            ProfileTarget {
                name: "lib.f".into(),
                depth: 0,
                module: "lib".into(),
                file: file.clone(),
            },
            ProfileTarget {
                name: "lib.g".into(),
                depth: 1,
                module: "lib".into(),
                file: file.clone(),
            },
        ];
        let bootstrap = BootstrapPlan {
            entry_file: file.clone(),
            entry_fn: "main".into(),
            profile_dir: "/tmp/profiles".into(),
            profile_label: None,
        };

        let summary = Patcher::new().apply(&targets, Some(&bootstrap)).unwrap();
        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.sites_patched, 3);

        let rewritten = std::fs::read_to_string(&file).unwrap();
        assert!(rewritten.contains("use prism::prelude::*;"));
        assert!(rewritten.contains(r#"begin_profile("lib.f")"#));
        assert!(rewritten.contains(r#"enter("lib.g")"#));
        assert!(rewritten.contains("end_profile_guard()"));
        assert!(rewritten.contains("leave_guard()"));
        assert!(rewritten.contains("shutdown_guard()"));
    }

    #[test]
    fn refuses_to_patch_an_already_patched_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "src/lib.rs",
            "use prism::prelude::*;\nfn f() {}\n",
        );
        let targets = vec![ProfileTarget {
            name: "lib.f".into(),
            depth: 0,
            module: "lib".into(),
            file: file.clone(),
        }];

        let err = Patcher::new().apply(&targets, None).unwrap_err();
        assert!(matches!(err, PrismError::PatchFailure { .. }));
    }
}
