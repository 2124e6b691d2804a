// tests/client_pipeline.rs

//! End-to-end client pipeline: resolve against a seeded cache, lock file
//! round trips, build with up-to-date detection, staging.

use dopamine::build::{build_all, BuildInput};
use dopamine::ident::recipe_revision;
use dopamine::profile::{BuildType, HostInfo, OptionSet, Os, Profile};
use dopamine::recipe::{Provider, Recipe};
use dopamine::recipe_dir::{RecipeDir, RECIPE_FILE};
use dopamine::resolver::{resolve, Heuristics, LockFile, Location, ResolveConfig, SystemPolicy};
use dopamine::services::{DepServices, NativeProvider, RecipeCache};
use semver::Version;
use std::fs;
use std::path::Path;

fn profile() -> Profile {
    Profile::new(
        "default",
        HostInfo {
            os: Os::Linux,
            arch: "x86_64".to_string(),
        },
        BuildType::Debug,
        vec![],
    )
}

fn resolve_cfg(heuristics: Heuristics) -> ResolveConfig {
    ResolveConfig {
        profile: profile(),
        options: OptionSet::new(),
        heuristics,
        system: SystemPolicy::Disallow,
    }
}

fn offline_services(cache_root: &Path) -> DepServices {
    let native = NativeProvider::new(None, RecipeCache::new(cache_root.to_path_buf()), true, true);
    DepServices::new(Box::new(native), None)
}

fn seed_cached_recipe(cache_root: &Path, name: &str, version: &str, body: &str) {
    let dir = cache_root.join(name).join(version).join("0000000000000000");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(RECIPE_FILE), body).unwrap();
}

fn load_with_revision(dir: &RecipeDir) -> Recipe {
    let mut recipe = Recipe::load(dir).unwrap();
    let files = recipe.include_files().unwrap();
    recipe.revision = Some(recipe_revision(dir.root(), &files).unwrap());
    recipe
}

#[test]
fn resolve_single_recipe_without_deps_writes_no_lock() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join(RECIPE_FILE),
        "let name = \"alpha\";\nlet version = \"0.1.0\";\nlet tools = [\"c++\"];\nfn build(d, c, i) {}\n",
    )
    .unwrap();
    let dir = RecipeDir::new(tmp.path()).unwrap();
    let recipe = load_with_revision(&dir);

    // the resolve command prints "No dependency - nothing to do" and skips
    // the lock entirely in this situation
    assert!(!recipe.has_dependencies());
    assert!(!dir.dep_lock_file().exists());
}

#[test]
fn resolve_two_level_native_dependencies() {
    let cache = tempfile::tempdir().unwrap();
    seed_cached_recipe(
        cache.path(),
        "beta",
        "1.2.0",
        "let name = \"beta\";\nlet version = \"1.2.0\";\nlet dependencies = #{ gamma: \"~>2.0.0\" };\nfn build(d, c, i) {}\n",
    );
    for v in ["2.0.0", "2.0.1", "2.1.0"] {
        seed_cached_recipe(
            cache.path(),
            "gamma",
            v,
            &format!("let name = \"gamma\";\nlet version = \"{v}\";\nfn build(d, c, i) {{}}\n"),
        );
    }

    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join(RECIPE_FILE),
        "let name = \"alpha\";\nlet version = \"1.0.0\";\nlet dependencies = #{ beta: \">=1.0.0\" };\nfn build(d, c, i) {}\n",
    )
    .unwrap();
    let dir = RecipeDir::new(tmp.path()).unwrap();
    let recipe = load_with_revision(&dir);

    let services = offline_services(cache.path());
    let graph = resolve(&recipe, &resolve_cfg(Heuristics::PickHighest), &services, None).unwrap();
    let lock = LockFile::from_graph(&graph).unwrap();
    lock.save(&dir.dep_lock_file()).unwrap();

    let loaded = LockFile::load(&dir.dep_lock_file()).unwrap();
    let names: Vec<String> = loaded
        .nodes
        .iter()
        .map(|n| format!("{}@{}", n.name, n.version))
        .collect();
    // ~>2.0.0 matches 2.0.x but not 2.1.0
    assert_eq!(names, vec!["gamma@2.0.1", "beta@1.2.0", "alpha@1.0.0"]);
    assert_eq!(loaded.nodes[0].location, Location::Cache);
    assert_eq!(loaded.nodes[2].location, Location::Local);

    // unchanged inputs resolve to a semantically equal lock
    let again = LockFile::from_graph(
        &resolve(&recipe, &resolve_cfg(Heuristics::PickHighest), &services, Some(&loaded)).unwrap(),
    )
    .unwrap();
    assert_eq!(
        serde_json::to_string(&again).unwrap(),
        serde_json::to_string(&loaded).unwrap()
    );
}

#[test]
fn build_caching_and_invalidation() {
    const SCRIPT: &str = r#"
let name = "alpha";
let version = "1.0.0";

fn build(dirs, config, deps) {
    install_file(path(dirs.src, "data.txt"), path(dirs.install, "data.txt"));
}
"#;
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join(RECIPE_FILE), SCRIPT).unwrap();
    fs::write(tmp.path().join("data.txt"), "payload").unwrap();
    let dir = RecipeDir::new(tmp.path()).unwrap();
    let recipe = load_with_revision(&dir);

    let cache = tempfile::tempdir().unwrap();
    let services = offline_services(cache.path());
    let graph = resolve(&recipe, &resolve_cfg(Heuristics::PickHighest), &services, None).unwrap();
    let p = profile();
    let input = BuildInput {
        root_dir: &dir,
        root_recipe: &recipe,
        graph: &graph,
        profile: &p,
        services: &services,
        force: false,
        stage_dest: None,
    };

    assert_eq!(build_all(&input).unwrap().built, vec!["alpha".to_string()]);
    // rerun without changes: nothing rebuilds
    let second = build_all(&input).unwrap();
    assert!(second.built.is_empty());
    assert_eq!(second.up_to_date, vec!["alpha".to_string()]);

    // touch the recipe: the build state is stale again
    std::thread::sleep(std::time::Duration::from_millis(20));
    fs::write(dir.recipe_file(), SCRIPT).unwrap();
    assert_eq!(build_all(&input).unwrap().built, vec!["alpha".to_string()]);
}

#[test]
fn light_recipe_stages_dependency_install_tree() {
    let cache = tempfile::tempdir().unwrap();
    seed_cached_recipe(
        cache.path(),
        "foo",
        "1.1.0",
        r#"
let name = "foo";
let version = "1.1.0";

fn build(dirs, config, deps) {
    mkdir(#{ dir: path(dirs.install, "share"), recurse: true });
    install_file(path(dirs.root, "dopamine.rhai"), path(dirs.install, "share", "foo.txt"));
}
"#,
    );

    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join(RECIPE_FILE),
        "let dependencies = #{ foo: \">=1.0.0\" };\n",
    )
    .unwrap();
    let dir = RecipeDir::new(tmp.path()).unwrap();
    let recipe = load_with_revision(&dir);
    assert!(recipe.is_light());

    let services = offline_services(cache.path());
    let graph = resolve(&recipe, &resolve_cfg(Heuristics::PickHighest), &services, None).unwrap();

    let foo = graph.find("foo", Provider::Native).unwrap();
    assert_eq!(graph.node(foo).version, Version::parse("1.1.0").unwrap());

    let dest = tmp.path().join("out");
    let p = profile();
    let report = build_all(&BuildInput {
        root_dir: &dir,
        root_recipe: &recipe,
        graph: &graph,
        profile: &p,
        services: &services,
        force: false,
        stage_dest: Some(dest.clone()),
    })
    .unwrap();

    // no build for the light package itself
    assert_eq!(report.built, vec!["foo".to_string()]);
    assert!(dest.join("share/foo.txt").is_file());
}

#[test]
fn revision_survives_include_permutation_and_archive_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join(RECIPE_FILE),
        "let name = \"alpha\";\nlet version = \"1.0.0\";\nlet include = [\"a.txt\", \"b.txt\"];\nfn build(d, c, i) {}\n",
    )
    .unwrap();
    fs::write(tmp.path().join("a.txt"), "aaa").unwrap();
    fs::write(tmp.path().join("b.txt"), "bbb").unwrap();
    let dir = RecipeDir::new(tmp.path()).unwrap();
    let recipe = load_with_revision(&dir);
    let revision = recipe.revision.clone().unwrap();

    // permuted include order hashes identically
    let shuffled = vec![
        "b.txt".into(),
        "dopamine.rhai".into(),
        "a.txt".into(),
    ];
    assert_eq!(revision, recipe_revision(dir.root(), &shuffled).unwrap());

    // archive the recipe files and extract: the revision is unchanged
    let staging = tempfile::tempdir().unwrap();
    for file in ["dopamine.rhai", "a.txt", "b.txt"] {
        fs::copy(tmp.path().join(file), staging.path().join(file)).unwrap();
    }
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join(format!("alpha-1.0.0-{revision}.tar.xz"));
    dopamine::archive::create(staging.path(), &archive).unwrap();

    let out = work.path().join("extracted");
    dopamine::archive::extract(&archive, &out).unwrap();
    let extracted_dir = RecipeDir::new(&out).unwrap();
    let extracted = load_with_revision(&extracted_dir);
    assert_eq!(extracted.revision.unwrap(), revision);
}
