use explorer_build::error::ErrorKind;
use explorer_build::{BackfillScope, BuildController, BuildMode};
use explorer_config::BuildConfig;
use explorer_content::{CatalogVersion, Category, VersionManifest};
use std::fs;
use std::path::{Path, PathBuf};

const AWS_SDK: &str = "  - name: aws-sdk-2.2\n    description: X\n";
const AKKA_V1: &str = "  - name: akka-http-10.0\n    description: first\n";
const AKKA_V2: &str = "  - name: akka-http-10.0\n    description: second\n";

struct Fixture {
    _dir: tempfile::TempDir,
    registry: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = dir.path().join("registry");
        let output = dir.path().join("public/data");
        fs::create_dir_all(&registry).unwrap();
        Self { _dir: dir, registry, output }
    }

    fn javaagent(&self, version: &str, libraries: &[&str]) {
        let dir = self.registry.join(format!("java/javaagent/v{version}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("instrumentation.yaml"), format!("libraries:\n{}", libraries.concat())).unwrap();
    }

    fn remove_javaagent(&self, version: &str) {
        fs::remove_dir_all(self.registry.join(format!("java/javaagent/v{version}"))).unwrap();
    }

    fn controller(&self) -> BuildController {
        self.controller_with_length(BuildConfig::default().content_id_length)
    }

    fn controller_with_length(&self, content_id_length: usize) -> BuildController {
        BuildController::from_config(&BuildConfig {
            registry_dir: self.registry.clone(),
            output_dir: self.output.clone(),
            content_id_length,
            ..BuildConfig::default()
        })
        .unwrap()
    }

    fn read(&self, path: &str) -> Vec<u8> {
        fs::read(self.output.join(path)).unwrap()
    }

    fn manifest(&self, version: &str) -> VersionManifest {
        VersionManifest::from_json(&self.read(&format!("javaagent/versions/{version}-index.json"))).unwrap()
    }

    /// Every file under `path`, relative to the output root, sorted.
    fn files(&self, path: &str) -> Vec<PathBuf> {
        fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
            let Ok(entries) = fs::read_dir(dir) else {
                return;
            };
            for entry in entries {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, files);
                } else {
                    files.push(path);
                }
            }
        }
        let mut files = Vec::new();
        walk(&self.output.join(path), &mut files);
        let mut files: Vec<_> = files.into_iter().map(|f| f.strip_prefix(&self.output).unwrap().to_path_buf()).collect();
        files.sort();
        files
    }

    /// Snapshot of every published file and its contents.
    fn tree(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.files("javaagent")
            .into_iter()
            .map(|path| {
                let contents = fs::read(self.output.join(&path)).unwrap();
                (path, contents)
            })
            .collect()
    }
}

fn version(s: &str) -> CatalogVersion {
    s.parse().unwrap()
}

fn content_id(manifest: &VersionManifest, id: &str) -> String {
    manifest.get(&"instrumentations".parse().unwrap(), &id.parse().unwrap()).unwrap().to_string()
}

#[tokio::test]
async fn test_scenario_layout() {
    let fixture = Fixture::new();
    fixture.javaagent("2.24.0", &[AWS_SDK]);
    let report = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    assert_eq!(report.latest, Some(version("2.24.0")));

    assert_eq!(
        fixture.files("javaagent"),
        [
            PathBuf::from("javaagent/instrumentations/aws-sdk-2.2/aws-sdk-2.2-374fbfa765af.json"),
            PathBuf::from("javaagent/versions/2.24.0-index.json"),
            PathBuf::from("javaagent/versions-index.json"),
        ]
    );
    let manifest = String::from_utf8(fixture.read("javaagent/versions/2.24.0-index.json")).unwrap();
    assert!(manifest.contains(r#""aws-sdk-2.2": "374fbfa765af""#));
    let index = String::from_utf8(fixture.read("javaagent/versions-index.json")).unwrap();
    assert_eq!(index, "{\n  \"versions\": [\n    {\n      \"is_latest\": true,\n      \"version\": \"2.24.0\"\n    }\n  ]\n}");
}

#[tokio::test]
async fn test_rebuild_is_idempotent() {
    let fixture = Fixture::new();
    fixture.javaagent("2.23.0", &[AWS_SDK, AKKA_V1]);
    fixture.javaagent("2.24.0", &[AWS_SDK, AKKA_V2]);
    fixture.javaagent("2.25.0-SNAPSHOT", &[AKKA_V2]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    let first = fixture.tree();

    // The snapshot is rebuilt, but to identical bytes.
    let report = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    assert_eq!(report.built, [version("2.25.0-SNAPSHOT")]);
    assert_eq!(report.stats.files_written, 0);
    assert_eq!(fixture.tree(), first);

    // Even a full backfill changes nothing when the input hasn't changed.
    fixture.controller().build(&Category::Javaagent, &BuildMode::Backfill(BackfillScope::All)).await.unwrap();
    assert_eq!(fixture.tree(), first);
}

#[tokio::test]
async fn test_identical_records_are_stored_once() {
    let fixture = Fixture::new();
    fixture.javaagent("2.23.0", &[AWS_SDK, AKKA_V1]);
    fixture.javaagent("2.24.0", &[AKKA_V2, AWS_SDK]);
    let report = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    assert_eq!(report.stats.artifacts_reused, 1);

    let (older, newer) = (fixture.manifest("2.23.0"), fixture.manifest("2.24.0"));
    assert_eq!(content_id(&older, "aws-sdk-2.2"), content_id(&newer, "aws-sdk-2.2"));
    assert_ne!(content_id(&older, "akka-http-10.0"), content_id(&newer, "akka-http-10.0"));
    assert_eq!(fixture.files("javaagent/instrumentations/aws-sdk-2.2").len(), 1);
    assert_eq!(fixture.files("javaagent/instrumentations/akka-http-10.0").len(), 2);
}

#[tokio::test]
async fn test_backfill_leaves_other_versions_untouched() {
    let fixture = Fixture::new();
    fixture.javaagent("2.23.0", &[AWS_SDK, AKKA_V1]);
    fixture.javaagent("2.24.0", &[AWS_SDK, AKKA_V2]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    let untouched_manifest = fixture.read("javaagent/versions/2.24.0-index.json");
    let newer = fixture.manifest("2.24.0");
    let only_newer = format!(
        "javaagent/instrumentations/akka-http-10.0/akka-http-10.0-{}.json",
        content_id(&newer, "akka-http-10.0")
    );
    let shared =
        format!("javaagent/instrumentations/aws-sdk-2.2/aws-sdk-2.2-{}.json", content_id(&newer, "aws-sdk-2.2"));
    let (only_newer_bytes, shared_bytes) = (fixture.read(&only_newer), fixture.read(&shared));

    // The watcher re-scanned 2.23.0 and dropped aws-sdk.
    fixture.javaagent("2.23.0", &[AKKA_V1]);
    let mode = BuildMode::Backfill(BackfillScope::Versions([version("2.23.0")].into()));
    let report = fixture.controller().build(&Category::Javaagent, &mode).await.unwrap();
    assert_eq!(report.built, [version("2.23.0")]);

    assert_eq!(fixture.manifest("2.23.0").len(), 1);
    assert_eq!(fixture.read("javaagent/versions/2.24.0-index.json"), untouched_manifest);
    assert_eq!(fixture.read(&only_newer), only_newer_bytes);
    assert_eq!(fixture.read(&shared), shared_bytes);
}

#[tokio::test]
async fn test_normal_build_only_adds_new_versions() {
    let fixture = Fixture::new();
    fixture.javaagent("2.23.0", &[AKKA_V1]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    let published = fixture.read("javaagent/versions/2.23.0-index.json");

    // Registry content of a released version changing is ignored without a backfill.
    fixture.javaagent("2.23.0", &[AKKA_V2]);
    fixture.javaagent("2.24.0", &[AKKA_V2]);
    let report = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    assert_eq!(report.built, [version("2.24.0")]);
    assert_eq!(fixture.read("javaagent/versions/2.23.0-index.json"), published);
    assert_eq!(report.latest, Some(version("2.24.0")));
}

#[tokio::test]
async fn test_snapshot_pruning() {
    let fixture = Fixture::new();
    fixture.javaagent("2.24.0", &[AWS_SDK]);
    fixture.javaagent("2.25.0-SNAPSHOT", &[AKKA_V1]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();

    // 2.25.0 got released; the watcher replaced the snapshot directory.
    fixture.remove_javaagent("2.25.0-SNAPSHOT");
    fixture.javaagent("2.25.0", &[AKKA_V2]);
    let report = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    assert_eq!(report.pruned, [version("2.25.0-SNAPSHOT")]);
    assert!(!fixture.output.join("javaagent/versions/2.25.0-SNAPSHOT-index.json").exists());
    let index = String::from_utf8(fixture.read("javaagent/versions-index.json")).unwrap();
    assert!(!index.contains("SNAPSHOT"));
    // Artifacts are only ever deleted by a clean build.
    assert_eq!(fixture.files("javaagent/instrumentations/akka-http-10.0").len(), 2);
}

#[tokio::test]
async fn test_clean_build_removes_unreferenced_artifacts() {
    let fixture = Fixture::new();
    fixture.javaagent("2.24.0", &[AKKA_V1]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    fixture.javaagent("2.24.0", &[AKKA_V2]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Clean).await.unwrap();
    assert_eq!(fixture.files("javaagent/instrumentations").len(), 1);
    assert_eq!(fixture.files("javaagent/versions").len(), 1);
}

#[tokio::test]
async fn test_collision_halts_build() {
    let fixture = Fixture::new();
    fixture.javaagent("2.23.0", &[AWS_SDK]);
    fixture.javaagent("2.24.0", &[AKKA_V1]);
    let forged = fixture.output.join("javaagent/instrumentations/aws-sdk-2.2/aws-sdk-2.2-374fbfa765af.json");
    fs::create_dir_all(forged.parent().unwrap()).unwrap();
    fs::write(&forged, br#"{"name": "aws-sdk-2.2", "description": "not X"}"#).unwrap();

    let err = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Collision { .. }));
    // Nothing after the collision ran.
    assert!(fixture.files("javaagent/versions").is_empty());
    assert!(!fixture.output.join("javaagent/versions-index.json").exists());
}

#[tokio::test]
async fn test_truncated_identifier_collision_across_versions() {
    let fixture = Fixture::new();
    // Both records hash to 2ca1862e with 8-character identifiers.
    fixture.javaagent("2.23.0", &["  - name: x\n    n: 9764\n"]);
    fixture.javaagent("2.24.0", &["  - name: x\n    n: 88290\n"]);
    let err = fixture.controller_with_length(8).build(&Category::Javaagent, &BuildMode::Normal).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Collision { .. }));
    assert_eq!(fixture.files("javaagent/versions"), [PathBuf::from("javaagent/versions/2.23.0-index.json")]);
    assert_eq!(
        fixture.files("javaagent/instrumentations"),
        [PathBuf::from("javaagent/instrumentations/x/x-2ca1862e.json")]
    );
    assert!(!fixture.output.join("javaagent/versions-index.json").exists());
}

#[tokio::test]
async fn test_interrupted_artifact_write_is_repaired() {
    let fixture = Fixture::new();
    fixture.javaagent("2.24.0", &[AWS_SDK]);
    let artifact = "javaagent/instrumentations/aws-sdk-2.2/aws-sdk-2.2-374fbfa765af.json";
    // What a write cut short by a full disk leaves behind.
    fs::create_dir_all(fixture.output.join(artifact).parent().unwrap()).unwrap();
    fs::write(fixture.output.join(artifact), b"{\n  \"descri").unwrap();

    let report = fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    assert_eq!(report.built, [version("2.24.0")]);
    assert_eq!(fixture.read(artifact), b"{\n  \"description\": \"X\",\n  \"name\": \"aws-sdk-2.2\"\n}");
    assert_eq!(
        fixture.files("javaagent/instrumentations"),
        [PathBuf::from(artifact)],
        "no temporary file is left next to the artifact"
    );
}

#[tokio::test]
async fn test_full_backfill_never_mixes_identifier_lengths() {
    let fixture = Fixture::new();
    fixture.javaagent("2.20.0", &[AKKA_V1]);
    fixture.javaagent("2.24.0", &[AWS_SDK]);
    fixture.controller().build(&Category::Javaagent, &BuildMode::Normal).await.unwrap();
    let published = fixture.tree();
    // The watcher stopped tracking 2.20.0; its release manifest stays published.
    fixture.remove_javaagent("2.20.0");

    let controller = fixture.controller_with_length(16);
    let err = controller.build(&Category::Javaagent, &BuildMode::Backfill(BackfillScope::All)).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::SchemeMismatch { expected: 16, found: 12, .. }));
    assert_eq!(fixture.tree(), published);

    // A clean build migrates what the registry still has.
    controller.build(&Category::Javaagent, &BuildMode::Clean).await.unwrap();
    assert_eq!(content_id(&fixture.manifest("2.24.0"), "aws-sdk-2.2").len(), 16);
    let index = String::from_utf8(fixture.read("javaagent/versions-index.json")).unwrap();
    assert!(!index.contains("2.20.0"));
}

#[tokio::test]
async fn test_collector_distribution() {
    let fixture = Fixture::new();
    let dir = fixture.registry.join("collector/contrib/v0.112.0");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("receiver.yaml"), "components:\n  - name: otlp\n  - name: jaeger\n").unwrap();
    fs::write(dir.join("exporter.yaml"), "components:\n  - name: otlp\n").unwrap();
    let category: Category = "collector/contrib".parse().unwrap();
    fixture.controller().build(&category, &BuildMode::Normal).await.unwrap();

    let manifest = VersionManifest::from_json(&fixture.read("collector/contrib/versions/0.112.0-index.json")).unwrap();
    assert_eq!(manifest.len(), 3);
    assert_eq!(manifest.item_types().count(), 5);
    let receivers = manifest.entries(&"receiver".parse().unwrap()).unwrap();
    let otlp = receivers.get(&"otlp".parse().unwrap()).unwrap();
    assert!(fixture.output.join(format!("collector/contrib/receiver/otlp/otlp-{otlp}.json")).exists());
}
