// src/recipe/mod.rs

//! Recipe loading and the typed handle over an evaluated recipe script
//!
//! A recipe is a rhai script (`dopamine.rhai`) evaluated once at load time.
//! Its globals declare identity (`name`, `version`, ...), its functions
//! implement behavior (`build`, `source`, `stage`, `dependencies`). The
//! [`Recipe`] handle extracts the globals into typed fields and exposes the
//! functions as host-side operations.
//!
//! Alien packages get the same handle: their metadata is synthesized into a
//! `Recipe` whose build step runs the generated ninja plan instead of a
//! script function.
//!
//! The engine behind a script recipe is single-threaded; the handle
//! serializes calls through a mutex. Calls may block on subprocesses and
//! I/O.

pub mod engine;
mod host;
pub mod value;

use crate::alien::{plan, AlienMeta, ALIEN_METADATA_FILE};
use crate::error::{Error, Result};
use crate::profile::{BuildConfig, OptionSet, OptionValue, Profile};
use crate::recipe_dir::{RecipeDir, RECIPE_FILE};
use crate::version::VersionSpec;
use rhai::{Dynamic, Engine, EvalAltResult, FuncArgs, Map, Scope, AST};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Which ecosystem supplies a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Native,
    Alien,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Native => f.write_str("native"),
            Provider::Alien => f.write_str("alien"),
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Provider::Native),
            "alien" => Ok(Provider::Alien),
            other => Err(Error::InvalidRecipe(format!("unknown provider `{other}`"))),
        }
    }
}

/// One declared dependency
#[derive(Debug, Clone)]
pub struct DepSpec {
    pub name: String,
    pub spec: VersionSpec,
    pub provider: Provider,
    pub options: OptionSet,
}

/// Absolute directories handed to a recipe's `build`
#[derive(Debug, Clone)]
pub struct BuildDirs {
    pub root: PathBuf,
    pub src: PathBuf,
    pub build: PathBuf,
    pub install: PathBuf,
}

/// What a recipe learns about one of its built dependencies
#[derive(Debug, Clone)]
pub struct DepInfo {
    pub install_dir: PathBuf,
}

/// A declared recipe option
#[derive(Debug, Clone)]
pub struct OptionDecl {
    pub name: String,
    pub default: OptionValue,
    pub description: String,
}

/// How the recipe stages its install tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageDecl {
    /// Recursive copy of the install tree
    Default,
    /// The recipe declares a `stage(src, dst)` function
    Function,
    /// `stage = false`: rebuild straight into the destination
    Disabled,
}

#[derive(Debug, Clone)]
enum SourceDecl {
    InTree(String),
    Function,
}

#[derive(Debug, Clone)]
enum DepsDecl {
    None,
    Static(Vec<DepSpec>),
    Function,
}

#[derive(Debug, Clone)]
enum IncludeDecl {
    None,
    List(Vec<String>),
    Function,
}

struct ScriptBackend {
    engine: Engine,
    ast: AST,
    scope: Mutex<Scope<'static>>,
    deps: DepsDecl,
    source: SourceDecl,
    include: IncludeDecl,
    stage: StageDecl,
    has_build: bool,
    has_post_stage: bool,
}

enum Backend {
    Script(ScriptBackend),
    Alien(AlienMeta),
}

/// Typed handle over a loaded recipe
pub struct Recipe {
    pub name: String,
    pub version: Version,
    pub description: Option<String>,
    pub license: Option<String>,
    pub upstream_url: Option<String>,
    /// Tool ids the recipe builds with, e.g. `["c++"]`
    pub tools: Vec<String>,
    pub options: Vec<OptionDecl>,
    /// Content revision, assigned after loading via [`crate::ident::recipe_revision`]
    pub revision: Option<String>,
    dir: PathBuf,
    backend: Backend,
}

fn script_err(e: Box<EvalAltResult>) -> Error {
    let position = e.position();
    Error::Recipe {
        message: e.to_string(),
        location: (!position.is_none()).then(|| position.to_string()),
    }
}

impl Recipe {
    /// Load and evaluate the recipe script of `dir`.
    pub fn load(dir: &RecipeDir) -> Result<Recipe> {
        let recipe_file = dir.recipe_file();
        if !recipe_file.is_file() {
            if dir.root().join(ALIEN_METADATA_FILE).is_file() {
                return Self::load_alien(dir.root());
            }
            return Err(Error::NotFound(format!("{RECIPE_FILE} in {}", dir.root().display())));
        }
        let script = fs::read_to_string(&recipe_file)
            .map_err(Error::io_context(format!("reading {}", recipe_file.display())))?;

        let engine = engine::new_engine();
        let ast = engine.compile(&script).map_err(|e| Error::Recipe {
            message: e.to_string(),
            location: Some(format!("{RECIPE_FILE} {}", e.1)),
        })?;
        let mut scope = engine::base_scope();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(script_err)?;

        let has_fn = |name: &str| ast.iter_functions().any(|f| f.name == name);

        let name = scope.get_value::<String>("name");
        let version = scope.get_value::<String>("version");
        let description = scope.get_value::<String>("description");
        let license = scope.get_value::<String>("license");
        let upstream_url = scope.get_value::<String>("upstream_url");

        let tools = match scope.get_value::<rhai::Array>("tools") {
            Some(arr) => arr
                .into_iter()
                .map(|d| {
                    d.into_string()
                        .map_err(|t| Error::InvalidRecipe(format!("tools entries must be strings, got {t}")))
                })
                .collect::<Result<Vec<String>>>()?,
            None => Vec::new(),
        };

        let options = match scope.get_value::<Map>("options") {
            Some(map) => parse_option_decls(&map)?,
            None => Vec::new(),
        };

        let deps = match scope.get_value::<Dynamic>("dependencies") {
            Some(d) => {
                let map = d
                    .read_lock::<Map>()
                    .ok_or_else(|| Error::InvalidRecipe("`dependencies` must be a table".to_string()))?;
                DepsDecl::Static(value::parse_dep_specs(&map)?)
            }
            None if has_fn("dependencies") => DepsDecl::Function,
            None => DepsDecl::None,
        };

        let source = match scope.get_value::<Dynamic>("source") {
            Some(d) if d.is_string() => SourceDecl::InTree(d.into_string().expect("checked string")),
            Some(_) => return Err(Error::InvalidRecipe("`source` must be a string".to_string())),
            None if has_fn("source") => SourceDecl::Function,
            None => SourceDecl::InTree(".".to_string()),
        };

        let include = match scope.get_value::<Dynamic>("include") {
            Some(d) if d.is_string() => {
                IncludeDecl::List(vec![d.into_string().expect("checked string")])
            }
            Some(d) => {
                let arr = d
                    .read_lock::<rhai::Array>()
                    .ok_or_else(|| Error::InvalidRecipe("`include` must be a string or array".to_string()))?;
                let mut list = Vec::with_capacity(arr.len());
                for item in arr.iter() {
                    list.push(item.clone().into_string().map_err(|_| {
                        Error::InvalidRecipe("`include` entries must be strings".to_string())
                    })?);
                }
                IncludeDecl::List(list)
            }
            None if has_fn("include") => IncludeDecl::Function,
            None => IncludeDecl::None,
        };

        let stage = match scope.get_value::<Dynamic>("stage") {
            Some(d) => match d.as_bool() {
                Ok(false) => StageDecl::Disabled,
                Ok(true) => {
                    warn!("`stage = true` has no effect, staging by copy");
                    StageDecl::Default
                }
                Err(_) => {
                    return Err(Error::InvalidRecipe(
                        "`stage` must be false or a function".to_string(),
                    ))
                }
            },
            None if has_fn("stage") => StageDecl::Function,
            None => StageDecl::Default,
        };

        let has_build = has_fn("build");
        let has_post_stage = has_fn("post_stage");

        if has_build && (name.is_none() || version.is_none()) {
            return Err(Error::InvalidRecipe(
                "buildable recipes must declare `name` and `version`".to_string(),
            ));
        }
        if !has_build && matches!(deps, DepsDecl::None) {
            return Err(Error::InvalidRecipe(
                "recipe declares neither `build` nor `dependencies`".to_string(),
            ));
        }

        let fallback_name = dir
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        let version = match version {
            Some(v) => parse_version(&v)?,
            None => Version::new(0, 0, 0),
        };
        let name = name.unwrap_or(fallback_name);

        debug!("loaded recipe {} from {}", name, dir.root().display());

        Ok(Recipe {
            name,
            version,
            description,
            license,
            upstream_url,
            tools,
            options,
            revision: None,
            dir: dir.root().to_path_buf(),
            backend: Backend::Script(ScriptBackend {
                engine,
                ast,
                scope: Mutex::new(scope),
                deps,
                source,
                include,
                stage,
                has_build,
                has_post_stage,
            }),
        })
    }

    /// Synthesize a recipe from alien metadata found in `dir`.
    pub fn load_alien(dir: &Path) -> Result<Recipe> {
        let meta = AlienMeta::load(dir)?;
        let version = parse_version(&meta.version)?;
        Ok(Recipe {
            name: meta.name.clone(),
            version,
            description: (!meta.description.is_empty()).then(|| meta.description.clone()),
            license: (!meta.license.is_empty()).then(|| meta.license.clone()),
            upstream_url: None,
            tools: vec![],
            options: vec![],
            revision: None,
            dir: dir.to_path_buf(),
            backend: Backend::Alien(meta),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Light recipes only aggregate dependencies, there is nothing to build.
    pub fn is_light(&self) -> bool {
        match &self.backend {
            Backend::Script(s) => !s.has_build,
            Backend::Alien(_) => false,
        }
    }

    pub fn is_alien(&self) -> bool {
        matches!(self.backend, Backend::Alien(_))
    }

    /// In-tree source directory, relative to the recipe root, when sources
    /// are not fetched.
    pub fn in_tree_src(&self) -> Option<PathBuf> {
        match &self.backend {
            Backend::Script(s) => match &s.source {
                SourceDecl::InTree(dir) => Some(PathBuf::from(dir)),
                SourceDecl::Function => None,
            },
            Backend::Alien(_) => Some(PathBuf::from(".")),
        }
    }

    pub fn has_dependencies(&self) -> bool {
        match &self.backend {
            Backend::Script(s) => match &s.deps {
                DepsDecl::None => false,
                DepsDecl::Static(list) => !list.is_empty(),
                DepsDecl::Function => true,
            },
            Backend::Alien(meta) => !meta.dependencies.is_empty(),
        }
    }

    pub fn stage_decl(&self) -> StageDecl {
        match &self.backend {
            Backend::Script(s) => s.stage,
            Backend::Alien(_) => StageDecl::Default,
        }
    }

    pub fn can_stage(&self) -> bool {
        self.stage_decl() != StageDecl::Disabled
    }

    /// Declared dependencies under the given profile.
    pub fn dependencies(&self, profile: &Profile) -> Result<Vec<DepSpec>> {
        match &self.backend {
            Backend::Script(s) => match &s.deps {
                DepsDecl::None => Ok(vec![]),
                DepsDecl::Static(list) => Ok(list.clone()),
                DepsDecl::Function => {
                    let result = s.call_fn("dependencies", (value::profile_to_map(profile),))?;
                    let map = result.read_lock::<Map>().ok_or_else(|| {
                        Error::InvalidRecipe("`dependencies()` must return a table".to_string())
                    })?;
                    value::parse_dep_specs(&map)
                }
            },
            Backend::Alien(meta) => {
                let mut out = Vec::with_capacity(meta.dependencies.len());
                for (name, spec) in &meta.dependencies {
                    out.push(DepSpec {
                        name: name.clone(),
                        spec: VersionSpec::parse(spec)?,
                        provider: Provider::Alien,
                        options: OptionSet::new(),
                    });
                }
                Ok(out)
            }
        }
    }

    /// Ensure sources are present, returning the source directory.
    ///
    /// In-tree sources resolve immediately; a `source()` function may fetch
    /// (it runs with the process cwd unchanged and returns the directory it
    /// produced, absolute or relative to the recipe root).
    pub fn source(&self) -> Result<PathBuf> {
        match &self.backend {
            Backend::Script(s) => match &s.source {
                SourceDecl::InTree(rel) => Ok(self.dir.join(rel)),
                SourceDecl::Function => {
                    let result = s.call_fn("source", ())?;
                    let path = result.into_string().map_err(|t| {
                        Error::InvalidRecipe(format!("`source()` must return a path string, got {t}"))
                    })?;
                    let path = PathBuf::from(path);
                    Ok(if path.is_absolute() {
                        path
                    } else {
                        self.dir.join(path)
                    })
                }
            },
            Backend::Alien(_) => Ok(self.dir.clone()),
        }
    }

    /// Files that define this recipe's revision: the recipe script (or alien
    /// metadata) plus everything `include` lists.
    pub fn include_files(&self) -> Result<Vec<PathBuf>> {
        match &self.backend {
            Backend::Script(s) => {
                let mut files = vec![PathBuf::from(RECIPE_FILE)];
                match &s.include {
                    IncludeDecl::None => {}
                    IncludeDecl::List(list) => files.extend(list.iter().map(PathBuf::from)),
                    IncludeDecl::Function => {
                        let result = s.call_fn("include", ())?;
                        let arr = result.read_lock::<rhai::Array>().ok_or_else(|| {
                            Error::InvalidRecipe("`include()` must return an array".to_string())
                        })?;
                        for item in arr.iter() {
                            let path = item.clone().into_string().map_err(|_| {
                                Error::InvalidRecipe("`include()` entries must be strings".to_string())
                            })?;
                            files.push(PathBuf::from(path));
                        }
                    }
                }
                Ok(files)
            }
            Backend::Alien(_) => Ok(vec![PathBuf::from(ALIEN_METADATA_FILE)]),
        }
    }

    /// Run the build step.
    pub fn build(
        &self,
        dirs: &BuildDirs,
        config: &BuildConfig,
        dep_infos: &BTreeMap<String, DepInfo>,
    ) -> Result<()> {
        match &self.backend {
            Backend::Script(s) => {
                if !s.has_build {
                    return Err(Error::InvalidRecipe(format!(
                        "recipe {} has no build step",
                        self.name
                    )));
                }
                s.call_fn(
                    "build",
                    (
                        value::build_dirs_to_map(dirs),
                        value::config_to_map(config),
                        value::dep_infos_to_map(dep_infos),
                    ),
                )?;
                Ok(())
            }
            Backend::Alien(meta) => self.build_alien(meta, dirs, config, dep_infos),
        }
    }

    /// Alien build: generate the ninja plan, run ninja, install the library,
    /// the import tree and the pkg-config file.
    fn build_alien(
        &self,
        meta: &AlienMeta,
        dirs: &BuildDirs,
        config: &BuildConfig,
        dep_infos: &BTreeMap<String, DepInfo>,
    ) -> Result<()> {
        let dep_install_dirs: Vec<PathBuf> =
            dep_infos.values().map(|i| i.install_dir.clone()).collect();
        let input = plan::PlanInput {
            meta,
            profile: &config.profile,
            src_dir: &dirs.src,
            build_dir: &dirs.build,
            install_dir: &dirs.install,
            dep_install_dirs: &dep_install_dirs,
        };
        let built = plan::generate(&input)?;

        fs::create_dir_all(&dirs.build)?;
        fs::write(dirs.build.join("build.ninja"), &built.ninja)?;

        let output = Command::new("ninja")
            .arg("-C")
            .arg(&dirs.build)
            .output()
            .map_err(Error::io_context("spawning ninja"))?;
        if !output.status.success() {
            return Err(Error::Subprocess {
                command: format!("ninja -C {}", dirs.build.display()),
                status: output.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let target = meta.lib_target();
        let lib_dir = dirs.install.join("lib");
        fs::create_dir_all(&lib_dir)?;
        fs::copy(dirs.build.join(&target), lib_dir.join(&target))
            .map_err(Error::io_context(format!("installing {target}")))?;

        // import/include tree for consumers
        let pkg = meta.name.replace([':', '/'], "_");
        let include_root = dirs.install.join("include").join(&pkg);
        for import in &meta.import_paths {
            let src_root = dirs.src.join(import);
            if !src_root.is_dir() {
                continue;
            }
            for entry in walkdir::WalkDir::new(&src_root).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry.path().strip_prefix(&src_root).expect("under src_root");
                let dest = include_root.join(rel);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::copy(entry.path(), &dest)?;
            }
        }

        let pc_dir = lib_dir.join("pkgconfig");
        fs::create_dir_all(&pc_dir)?;
        fs::write(pc_dir.join(format!("{pkg}.pc")), &built.pkg_config)?;
        Ok(())
    }

    /// Invoke the recipe's `stage(src, dst)` function. Only valid when
    /// [`Recipe::stage_decl`] is [`StageDecl::Function`].
    pub fn call_stage(&self, src: &Path, dst: &Path) -> Result<()> {
        match &self.backend {
            Backend::Script(s) => {
                s.call_fn(
                    "stage",
                    (src.display().to_string(), dst.display().to_string()),
                )?;
                Ok(())
            }
            Backend::Alien(_) => Err(Error::InvalidRecipe(
                "alien packages stage by copy".to_string(),
            )),
        }
    }

    /// Run `post_stage()` if the recipe declares it.
    pub fn post_stage(&self) -> Result<()> {
        if let Backend::Script(s) = &self.backend {
            if s.has_post_stage {
                s.call_fn("post_stage", ())?;
            }
        }
        Ok(())
    }
}

impl ScriptBackend {
    fn call_fn(&self, name: &str, args: impl FuncArgs) -> Result<Dynamic> {
        let mut scope = self.scope.lock().expect("engine mutex poisoned");
        self.engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, name, args)
            .map_err(script_err)
    }
}

fn parse_version(s: &str) -> Result<Version> {
    Version::parse(s).map_err(|_| Error::InvalidVersion(s.to_string()))
}

fn parse_option_decls(map: &Map) -> Result<Vec<OptionDecl>> {
    let mut out = Vec::with_capacity(map.len());
    for (name, decl) in map {
        let table = decl.read_lock::<Map>().ok_or_else(|| {
            Error::InvalidRecipe(format!("option `{name}` must be a table with `default`"))
        })?;
        let default = table
            .get("default")
            .ok_or_else(|| Error::InvalidRecipe(format!("option `{name}` has no default")))?;
        let default = value::dynamic_to_option_value(default)?;
        let description = table
            .get("description")
            .and_then(|d| d.clone().into_string().ok())
            .unwrap_or_default();
        out.push(OptionDecl {
            name: name.to_string(),
            default,
            description,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{BuildType, HostInfo, Os};

    fn write_recipe(dir: &Path, script: &str) -> RecipeDir {
        fs::write(dir.join(RECIPE_FILE), script).unwrap();
        RecipeDir::new(dir).unwrap()
    }

    fn profile() -> Profile {
        Profile::new(
            "default",
            HostInfo {
                os: Os::current(),
                arch: "x86_64".to_string(),
            },
            BuildType::Debug,
            vec![],
        )
    }

    #[test]
    fn test_load_full_recipe() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            r#"
let name = "alpha";
let version = "1.2.0";
let description = "test package";
let license = "MIT";
let tools = ["c++"];
let options = #{
    shared: #{ default: true, description: "build shared libs" },
};

fn build(dirs, config, deps) {}
"#,
        );
        let recipe = Recipe::load(&dir).unwrap();
        assert_eq!(recipe.name, "alpha");
        assert_eq!(recipe.version, Version::new(1, 2, 0));
        assert_eq!(recipe.description.as_deref(), Some("test package"));
        assert_eq!(recipe.tools, vec!["c++".to_string()]);
        assert!(!recipe.is_light());
        assert!(!recipe.is_alien());
        assert_eq!(recipe.in_tree_src(), Some(PathBuf::from(".")));
        assert!(!recipe.has_dependencies());
        assert_eq!(recipe.options.len(), 1);
        assert_eq!(recipe.options[0].default, OptionValue::Bool(true));
    }

    #[test]
    fn test_light_recipe() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            r#"
let dependencies = #{
    foo: ">=1.0.0",
};
"#,
        );
        let recipe = Recipe::load(&dir).unwrap();
        assert!(recipe.is_light());
        assert!(recipe.has_dependencies());
        let deps = recipe.dependencies(&profile()).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "foo");
        assert_eq!(deps[0].spec.to_string(), ">=1.0.0");
    }

    #[test]
    fn test_empty_recipe_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(tmp.path(), "let name = \"x\";");
        assert!(Recipe::load(&dir).is_err());
    }

    #[test]
    fn test_dependencies_function_sees_profile() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            r#"
let name = "alpha";
let version = "1.0.0";

fn dependencies(profile) {
    if profile.build_type == "debug" {
        #{ dbgtool: "*" }
    } else {
        #{}
    }
}

fn build(dirs, config, deps) {}
"#,
        );
        let recipe = Recipe::load(&dir).unwrap();
        let deps = recipe.dependencies(&profile()).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].name, "dbgtool");
    }

    #[test]
    fn test_build_invokes_script() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            r#"
let name = "alpha";
let version = "1.0.0";

fn build(dirs, config, deps) {
    mkdir(#{ dir: dirs.install, recurse: true });
    install_file(path(dirs.src, "input.txt"), path(dirs.install, "output.txt"));
}
"#,
        );
        let recipe = Recipe::load(&dir).unwrap();

        let work = tempfile::tempdir().unwrap();
        let src = work.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("input.txt"), "payload").unwrap();
        let dirs = BuildDirs {
            root: work.path().to_path_buf(),
            src: src.clone(),
            build: work.path().join("build"),
            install: work.path().join("install"),
        };
        let config = BuildConfig::new(profile(), OptionSet::new());
        recipe.build(&dirs, &config, &BTreeMap::new()).unwrap();
        assert_eq!(
            fs::read_to_string(work.path().join("install/output.txt")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn test_script_error_carries_location() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            r#"
let name = "alpha";
let version = "1.0.0";

fn build(dirs, config, deps) {
    throw "boom";
}
"#,
        );
        let recipe = Recipe::load(&dir).unwrap();
        let dirs = BuildDirs {
            root: tmp.path().to_path_buf(),
            src: tmp.path().to_path_buf(),
            build: tmp.path().join("b"),
            install: tmp.path().join("i"),
        };
        let config = BuildConfig::new(profile(), OptionSet::new());
        let err = recipe.build(&dirs, &config, &BTreeMap::new()).unwrap_err();
        match err {
            Error::Recipe { message, .. } => assert!(message.contains("boom"), "{message}"),
            other => panic!("expected recipe error, got {other}"),
        }
    }

    #[test]
    fn test_stage_false_and_function() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            "let name = \"a\";\nlet version = \"1.0.0\";\nlet stage = false;\nfn build(d, c, i) {}\n",
        );
        let recipe = Recipe::load(&dir).unwrap();
        assert_eq!(recipe.stage_decl(), StageDecl::Disabled);
        assert!(!recipe.can_stage());

        let tmp2 = tempfile::tempdir().unwrap();
        let dir2 = write_recipe(
            tmp2.path(),
            "let name = \"a\";\nlet version = \"1.0.0\";\nfn build(d, c, i) {}\nfn stage(src, dst) {}\n",
        );
        let recipe2 = Recipe::load(&dir2).unwrap();
        assert_eq!(recipe2.stage_decl(), StageDecl::Function);
    }

    #[test]
    fn test_source_function() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            r#"
let name = "alpha";
let version = "1.0.0";

fn source() {
    mkdir(#{ dir: "fetched", recurse: true });
    "fetched"
}

fn build(dirs, config, deps) {}
"#,
        );
        let recipe = Recipe::load(&dir).unwrap();
        assert_eq!(recipe.in_tree_src(), None);
        let prev = std::env::current_dir().unwrap();
        std::env::set_current_dir(tmp.path()).unwrap();
        let src = recipe.source().unwrap();
        std::env::set_current_dir(prev).unwrap();
        assert_eq!(src, tmp.path().join("fetched"));
        assert!(src.is_dir());
    }

    #[test]
    fn test_include_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_recipe(
            tmp.path(),
            "let name = \"a\";\nlet version = \"1.0.0\";\nlet include = [\"patches/fix.patch\"];\nfn build(d, c, i) {}\n",
        );
        let recipe = Recipe::load(&dir).unwrap();
        let files = recipe.include_files().unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from(RECIPE_FILE), PathBuf::from("patches/fix.patch")]
        );
    }

    #[test]
    fn test_alien_recipe() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(ALIEN_METADATA_FILE),
            r#"{"name": "evcore", "version": "0.9.20", "dependencies": {"taggedalgebraic": "~>0.11.22"}, "sourcePaths": ["source"]}"#,
        )
        .unwrap();
        let recipe = Recipe::load_alien(tmp.path()).unwrap();
        assert!(recipe.is_alien());
        assert!(!recipe.is_light());
        let deps = recipe.dependencies(&profile()).unwrap();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].provider, Provider::Alien);
    }
}
