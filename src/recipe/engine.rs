// src/recipe/engine.rs

//! Script engine construction
//!
//! One engine instance is built per loaded recipe. The engine is strictly
//! single-threaded; callers serialize access through the `Recipe` handle.
//! Host constants live in a global module so they resolve inside script
//! functions, not just in top-level statements.

use crate::profile::Os;
use crate::recipe::host;
use rhai::{Engine, Module, Scope};

/// Build an engine with the host module and constants registered.
pub fn new_engine() -> Engine {
    let mut engine = Engine::new();
    // recipes are build scripts, not untrusted input, but runaway loops
    // should still die rather than hang a build
    engine.set_max_operations(50_000_000);
    host::register(&mut engine);

    let os = Os::current();
    let mut constants = Module::new();
    constants.set_var("OS", os.to_string());
    constants.set_var("POSIX", os.is_posix());
    constants.set_var("DIR_SEP", std::path::MAIN_SEPARATOR.to_string());
    constants.set_var("PATH_SEP", if cfg!(windows) { ";" } else { ":" }.to_string());
    engine.register_global_module(constants.into());

    engine
}

/// Fresh evaluation scope for a recipe script.
pub fn base_scope() -> Scope<'static> {
    Scope::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_visible_to_scripts() {
        let engine = new_engine();
        let mut scope = base_scope();
        let posix: bool = engine.eval_with_scope(&mut scope, "POSIX").unwrap();
        assert_eq!(posix, Os::current().is_posix());
        let sep: String = engine.eval_with_scope(&mut scope, "DIR_SEP").unwrap();
        assert!(!sep.is_empty());
    }

    #[test]
    fn test_constants_visible_inside_functions() {
        let engine = new_engine();
        let mut scope = base_scope();
        let script = r#"
fn which_os() { OS }
which_os()
"#;
        let os: String = engine.eval_with_scope(&mut scope, script).unwrap();
        assert_eq!(os, Os::current().to_string());
    }

    #[test]
    fn test_host_functions_callable() {
        let engine = new_engine();
        let mut scope = base_scope();
        let joined: String = engine
            .eval_with_scope(&mut scope, r#"path("/a", "b", "c")"#)
            .unwrap();
        assert_eq!(joined, "/a/b/c");
        let base: String = engine
            .eval_with_scope(&mut scope, r#"base_name("/a/b/c.txt")"#)
            .unwrap();
        assert_eq!(base, "c.txt");
    }
}
