//! End-to-end pipeline tests against the in-memory API.


use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{ConversionRules, FailFlags, IconSource, ImageMode};
use crate::notion::api::NotionApi;
use crate::notion::database::NotionDatabase;
use crate::progress::{NullReporter, Phase, ProgressReporter};
use crate::typing::ColumnType;
use crate::uploader::{run_delete_all, run_upload, FatalError, RunStatus};

use mock::{
    files_prop, formula_prop, multi_select_prop, number_prop, people_prop, relation_prop,
    select_prop, status_prop, text_prop, title_prop, MockApi, ScriptedFailure,
};

const DB: &str = "db1";
const LINKED_DB: &str = "db2";

fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content).unwrap();
    path
}

fn rules_for(input_file: PathBuf) -> ConversionRules {
    ConversionRules {
        input_file,
        delimiter: b',',
        column_types: None,
        payload_key_column: None,
        max_threads: 2,
        randomize_select_colors: false,
        merge: false,
        merge_only_columns: vec![],
        merge_skip_new: false,
        add_missing_columns: false,
        add_missing_relations: false,
        rename_key_column: None,
        image_columns: vec![],
        image_column_keep: false,
        image_mode: ImageMode::Block,
        image_caption_column: None,
        image_caption_column_keep: false,
        icon_column: None,
        icon_column_keep: false,
        default_icon: None,
        mandatory_columns: vec![],
        caption: None,
        fail: FailFlags::default(),
    }
}

async fn run(api: &Arc<MockApi>, rules: ConversionRules) -> Result<RunStatus, FatalError> {
    let api: Arc<dyn NotionApi> = Arc::clone(api) as _;
    run_upload(rules, api, DB, Arc::new(NullReporter), None).await
}

fn rich_text_content(value: &serde_json::Value) -> Option<&str> {
    value
        .get("rich_text")?
        .as_array()?
        .first()?
        .get("text")?
        .get("content")?
        .as_str()
}

#[tokio::test]
async fn uploads_rows_with_guessed_types() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n2,y\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);

    let status = run(&api, rules_for(input)).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.pages_created(), 2);

    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(rich_text_content(&page.properties["b"]).unwrap(), "x");
    assert!(api.page_by_title(DB, "2").is_some());
}

#[tokio::test]
async fn unparseable_numbers_become_empty_values() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n2,y\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), number_prop("b")]);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Number]);
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["b"]["number"], serde_json::Value::Null);
}

#[tokio::test]
async fn conversion_errors_fail_rows_when_strict() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n2,y\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), number_prop("b")]);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Number]);
    rules.fail.on_conversion_error = true;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::RowFailures(2));
    assert_eq!(api.pages_created(), 0);
}

#[tokio::test]
async fn merge_updates_matches_and_inserts_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,new\n3,zzz\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);
    let seeded = api.add_page(
        DB,
        serde_json::json!({
            "a": { "title": [{ "text": { "content": "1" } }] },
            "b": { "rich_text": [{ "text": { "content": "old" } }] },
        }),
    );

    let mut rules = rules_for(input);
    rules.merge = true;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    // row "1" updated in place, row "3" inserted
    assert_eq!(api.pages_created(), 1);
    assert_eq!(api.page_count(DB), 2);
    let updated = api.page(&seeded);
    assert_eq!(rich_text_content(&updated.properties["b"]).unwrap(), "new");
    assert!(api.page_by_title(DB, "3").is_some());
}

#[tokio::test]
async fn merge_same_key_rows_update_the_row_inserted_earlier_in_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n9,first\n9,second\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);

    let mut rules = rules_for(input);
    rules.merge = true;
    rules.max_threads = 1;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.pages_created(), 1);

    let page = api.page_by_title(DB, "9").unwrap();
    assert_eq!(rich_text_content(&page.properties["b"]).unwrap(), "second");
}

#[tokio::test]
async fn merge_skip_new_only_touches_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,new\n3,zzz\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);
    api.add_titled_page(DB, "a", "1");

    let mut rules = rules_for(input);
    rules.merge = true;
    rules.merge_skip_new = true;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.pages_created(), 0);
    assert_eq!(api.page_count(DB), 1);
}

#[tokio::test]
async fn merge_only_column_limits_the_update() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b,c\n1,bee,sea\n");
    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), text_prop("b"), text_prop("c")],
    );
    let seeded = api.add_page(
        DB,
        serde_json::json!({
            "a": { "title": [{ "text": { "content": "1" } }] },
            "c": { "rich_text": [{ "text": { "content": "keep" } }] },
        }),
    );

    let mut rules = rules_for(input);
    rules.merge = true;
    rules.merge_only_columns = vec!["b".to_owned()];
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let page = api.page(&seeded);
    assert_eq!(rich_text_content(&page.properties["b"]).unwrap(), "bee");
    assert_eq!(rich_text_content(&page.properties["c"]).unwrap(), "keep");
}

#[tokio::test]
async fn image_blocks_share_one_upload_and_carry_the_caption() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir, "photo.png", b"not really a png");
    let input = write_file(&dir, "data.csv", b"a,pic,cap\n1,photo.png,hi\n2,photo.png,\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let mut rules = rules_for(input);
    rules.image_columns = vec!["pic".to_owned()];
    rules.image_mode = ImageMode::Block;
    rules.image_caption_column = Some("cap".to_owned());
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    // two rows referencing the same local file, exactly one upload
    assert_eq!(api.upload_creates(), 1);
    let uploads = api.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].filename, "photo.png");
    assert_eq!(uploads[0].content_type, "image/png");
    assert_eq!(uploads[0].bytes, b"not really a png");
    assert!(uploads[0].completed);

    let first = api.page_by_title(DB, "1").unwrap();
    let blocks = api.blocks_for(&first.id);
    assert_eq!(blocks.len(), 1);
    let image = &blocks[0]["image"];
    assert_eq!(blocks[0]["type"], "image");
    assert_eq!(image["type"], "file_upload");
    let first_upload = image["file_upload"]["id"].as_str().unwrap().to_owned();
    assert_eq!(image["caption"][0]["text"]["content"], "hi");

    let second = api.page_by_title(DB, "2").unwrap();
    let blocks = api.blocks_for(&second.id);
    assert_eq!(blocks[0]["image"]["file_upload"]["id"], first_upload.as_str());
    assert!(blocks[0]["image"].get("caption").is_none());
}

#[tokio::test]
async fn cover_mode_sets_the_page_cover() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,pic\n1,https://img.example/x.png\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let mut rules = rules_for(input);
    rules.image_columns = vec!["pic".to_owned()];
    rules.image_mode = ImageMode::Cover;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.upload_creates(), 0);

    let page = api.page_by_title(DB, "1").unwrap();
    let cover = page.cover.unwrap();
    assert_eq!(cover["type"], "external");
    assert_eq!(cover["external"]["url"], "https://img.example/x.png");
    assert!(api.blocks_for(&page.id).is_empty());
}

#[tokio::test]
async fn emoji_icons_set_without_uploading() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", "a,ico\n1,🚀\n".as_bytes());
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let mut rules = rules_for(input);
    rules.icon_column = Some("ico".to_owned());
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.upload_creates(), 0);

    let page = api.page_by_title(DB, "1").unwrap();
    let icon = page.icon.unwrap();
    assert_eq!(icon["type"], "emoji");
    assert_eq!(icon["emoji"], "🚀");
}

#[tokio::test]
async fn default_icon_fills_empty_icon_cells() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", "a,ico\n1,\n2,🎉\n".as_bytes());
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let mut rules = rules_for(input);
    rules.icon_column = Some("ico".to_owned());
    rules.default_icon = Some(IconSource::Emoji("⭐".to_owned()));
    run(&api, rules).await.unwrap();

    let first = api.page_by_title(DB, "1").unwrap();
    assert_eq!(first.icon.unwrap()["emoji"], "⭐");
    let second = api.page_by_title(DB, "2").unwrap();
    assert_eq!(second.icon.unwrap()["emoji"], "🎉");
}

#[tokio::test]
async fn delete_all_archives_every_paginated_row() {
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);
    for i in 0..250 {
        api.add_titled_page(DB, "a", &format!("row {i}"));
    }

    struct Counting {
        total: AtomicUsize,
        done: AtomicUsize,
    }
    impl ProgressReporter for Counting {
        fn set_phase(&self, _phase: Phase) {}
        fn register_rows(&self, total: usize) {
            self.total.store(total, Ordering::SeqCst);
        }
        fn row_succeeded(&self, _label: &str, _warnings: &[String]) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
        fn row_failed(&self, _label: &str, _error: &str) {}
        fn log_info(&self, _message: &str) {}
        fn log_warn(&self, _message: &str) {}
        fn log_error(&self, _message: &str) {}
        fn finish(&self) {}
    }

    let reporter = Arc::new(Counting {
        total: AtomicUsize::new(0),
        done: AtomicUsize::new(0),
    });
    let status = run_delete_all(Arc::clone(&api) as _, DB, Arc::clone(&reporter) as _)
        .await
        .unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.archived_count(), 250);
    assert_eq!(reporter.total.load(Ordering::SeqCst), 250);
    assert_eq!(reporter.done.load(Ordering::SeqCst), 250);
}

#[tokio::test]
async fn merge_index_sees_every_page_across_pagination() {
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);
    for i in 0..250 {
        api.add_titled_page(DB, "a", &format!("key-{i}"));
    }

    let db = NotionDatabase::load(Arc::clone(&api) as _, DB).await.unwrap();
    db.ensure_rows_loaded().await.unwrap();
    assert_eq!(db.row_count().await, 250);
    assert!(db.row_for_key("key-0").await.is_some());
    assert!(db.row_for_key("key-249").await.is_some());
    assert!(!db.has_duplicate_keys().await);
}

#[tokio::test]
async fn fail_on_duplicates_stops_before_any_write() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n1,y\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);

    let mut rules = rules_for(input);
    rules.fail.on_duplicates = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::InputKeyDuplicates)
    ));
    assert_eq!(api.pages_created(), 0);
}

#[tokio::test]
async fn fail_on_duplicates_detects_remote_repeats() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);
    api.add_titled_page(DB, "a", "dup");
    api.add_titled_page(DB, "a", "dup");

    let mut rules = rules_for(input);
    rules.fail.on_duplicates = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::RemoteKeyDuplicates)
    ));
    assert_eq!(api.pages_created(), 0);
}

#[tokio::test]
async fn failed_rows_do_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,10\n2,x\n3,30\n4,y\n5,50\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), number_prop("b")]);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Number]);
    rules.fail.on_conversion_error = true;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::RowFailures(2));
    assert_eq!(api.pages_created(), 3);
}

#[tokio::test]
async fn scripted_write_failures_are_counted_per_row() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n2,y\n3,z\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);
    api.script_create_page_failure(ScriptedFailure::Server);
    api.script_create_page_failure(ScriptedFailure::RateLimited);

    let mut rules = rules_for(input);
    rules.max_threads = 1;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::RowFailures(2));
    assert_eq!(api.pages_created(), 1);
}

#[tokio::test]
async fn missing_columns_are_dropped_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b,c\n1,x,y\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("c")]);

    let status = run(&api, rules_for(input)).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    let page = api.page_by_title(DB, "1").unwrap();
    assert!(!page.properties.contains_key("b"));
    assert_eq!(rich_text_content(&page.properties["c"]).unwrap(), "y");
}

#[tokio::test]
async fn run_fails_when_every_writable_column_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let err = run(&api, rules_for(input)).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::NoWritableColumns)
    ));
    assert_eq!(api.pages_created(), 0);
}

#[tokio::test]
async fn missing_columns_can_be_added_with_their_guessed_types() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b,n\n1,x,5\n2,y,7\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let mut rules = rules_for(input);
    rules.add_missing_columns = true;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    assert_eq!(api.property(DB, "b").unwrap().type_code, "rich_text");
    assert_eq!(api.property(DB, "n").unwrap().type_code, "number");
    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["n"]["number"], 5.0);
}

#[tokio::test]
async fn fail_on_missing_columns_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a")]);

    let mut rules = rules_for(input);
    rules.fail.on_missing_columns = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::MissingColumns(_))
    ));
}

#[tokio::test]
async fn unsettable_columns_are_dropped_or_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b,c\n1,x,y\n");
    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), formula_prop("b"), text_prop("c")],
    );

    let status = run(&api, rules_for(input.clone())).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    let page = api.page_by_title(DB, "1").unwrap();
    assert!(!page.properties.contains_key("b"));
    assert_eq!(rich_text_content(&page.properties["c"]).unwrap(), "y");

    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), formula_prop("b"), text_prop("c")],
    );
    let mut rules = rules_for(input);
    rules.fail.on_unsettable_columns = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::UnsettableColumns(_))
    ));
}

#[tokio::test]
async fn relations_resolve_by_title_and_can_add_missing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,\"X, Y\"\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), relation_prop("b", LINKED_DB)]);
    api.add_database(LINKED_DB, "linked", vec![title_prop("Name")]);
    let linked_x = api.add_titled_page(LINKED_DB, "Name", "X");

    // default: unresolved fragments are dropped
    let status = run(&api, rules_for(input.clone())).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    let page = api.page_by_title(DB, "1").unwrap();
    let relation = page.properties["b"]["relation"].as_array().unwrap();
    assert_eq!(relation.len(), 1);
    assert_eq!(relation[0]["id"], linked_x.as_str());
    assert_eq!(api.page_count(LINKED_DB), 1);

    // with --add-missing-relations the missing referent is created
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), relation_prop("b", LINKED_DB)]);
    api.add_database(LINKED_DB, "linked", vec![title_prop("Name")]);
    api.add_titled_page(LINKED_DB, "Name", "X");
    let mut rules = rules_for(input);
    rules.add_missing_relations = true;
    run(&api, rules).await.unwrap();
    assert_eq!(api.page_count(LINKED_DB), 2);
    assert!(api.page_by_title(LINKED_DB, "Y").is_some());
    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["b"]["relation"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn inaccessible_relations_are_dropped_or_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b,c\n1,X,y\n");
    let api = Arc::new(MockApi::new());
    // the linked database is never registered, so opening it 404s
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), relation_prop("b", "gone"), text_prop("c")],
    );

    let status = run(&api, rules_for(input.clone())).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    let page = api.page_by_title(DB, "1").unwrap();
    assert!(!page.properties.contains_key("b"));
    assert_eq!(rich_text_content(&page.properties["c"]).unwrap(), "y");

    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), relation_prop("b", "gone"), text_prop("c")],
    );
    let mut rules = rules_for(input);
    rules.fail.on_inaccessible_relations = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::InaccessibleRelations(_))
    ));
}

#[tokio::test]
async fn relation_duplicates_are_fatal_when_strict() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,X\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), relation_prop("b", LINKED_DB)]);
    api.add_database(LINKED_DB, "linked", vec![title_prop("Name")]);
    api.add_titled_page(LINKED_DB, "Name", "X");
    api.add_titled_page(LINKED_DB, "Name", "X");

    let mut rules = rules_for(input);
    rules.fail.on_relation_duplicates = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::RelationDuplicates { .. })
    ));
}

#[tokio::test]
async fn unknown_status_values_use_the_default_or_stay_empty() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,s\n1,Bogus\n");

    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![
            title_prop("a"),
            status_prop("s", &["Not started", "Done"], Some("Not started")),
        ],
    );
    run(&api, rules_for(input.clone())).await.unwrap();
    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["s"]["status"]["name"], "Not started");

    // no default declared: the cell is left empty
    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), status_prop("s", &["Done"], None)],
    );
    run(&api, rules_for(input.clone())).await.unwrap();
    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["s"]["status"], serde_json::Value::Null);

    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![title_prop("a"), status_prop("s", &["Done"], None)],
    );
    let mut rules = rules_for(input);
    rules.fail.on_wrong_status_values = true;
    let err = run(&api, rules).await.unwrap_err();
    assert!(matches!(
        err,
        FatalError::Schema(crate::schema::Error::WrongStatusValues { .. })
    ));
}

#[tokio::test]
async fn new_select_options_are_created_on_the_fly() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,s,m\n1,fresh,\"x, y\"\n");
    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![
            title_prop("a"),
            select_prop("s", &["stale"]),
            multi_select_prop("m", &["x"]),
        ],
    );

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Select, ColumnType::MultiSelect]);
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let select = api.property(DB, "s").unwrap().select.unwrap();
    let names: Vec<_> = select.options.iter().map(|o| o.name.as_str()).collect();
    assert!(names.contains(&"stale") && names.contains(&"fresh"));

    let multi = api.property(DB, "m").unwrap().multi_select.unwrap();
    let names: Vec<_> = multi.options.iter().map(|o| o.name.as_str()).collect();
    assert!(names.contains(&"y"));

    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["s"]["select"]["name"], "fresh");
    assert_eq!(page.properties["m"]["multi_select"][1]["name"], "y");
}

#[tokio::test]
async fn people_resolve_by_email_then_name() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,p\n1,\"bob@example.com, Alice, nobody\"\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), people_prop("p")]);
    api.add_user("u-bob", "Bob", Some("bob@example.com"));
    api.add_user("u-alice", "Alice", None);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Person]);
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let page = api.page_by_title(DB, "1").unwrap();
    let people = page.properties["p"]["people"].as_array().unwrap();
    assert_eq!(people.len(), 2);
    assert_eq!(people[0]["id"], "u-bob");
    assert_eq!(people[1]["id"], "u-alice");
}

#[tokio::test]
async fn file_columns_mix_urls_and_uploads() {
    let dir = tempfile::tempdir().unwrap();
    write_file(&dir, "doc.pdf", b"pdf bytes");
    let input = write_file(
        &dir,
        "data.csv",
        b"a,f\n1,\"https://files.example/a.txt, doc.pdf\"\n",
    );
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), files_prop("f")]);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::File]);
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.upload_creates(), 1);

    let page = api.page_by_title(DB, "1").unwrap();
    let files = page.properties["f"]["files"].as_array().unwrap();
    assert_eq!(files[0]["type"], "external");
    assert_eq!(files[1]["type"], "file_upload");
    assert_eq!(files[1]["name"], "doc.pdf");
}

#[tokio::test]
async fn mandatory_columns_fail_rows_when_empty() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n2,\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("b")]);

    let mut rules = rules_for(input);
    rules.mandatory_columns = vec!["b".to_owned()];
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::RowFailures(1));
    assert_eq!(api.pages_created(), 1);
}

#[tokio::test]
async fn key_column_rename_applies_to_the_remote_title() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,b\n1,x\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("Name"), text_prop("b")]);

    let mut rules = rules_for(input);
    rules.rename_key_column = Some(("a".to_owned(), "Identifier".to_owned()));
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    assert!(api.property(DB, "Identifier").is_some());
    assert!(api.property(DB, "Name").is_none());
    assert!(api.page_by_title(DB, "1").is_some());
}

#[tokio::test]
async fn kept_image_columns_are_also_written_as_properties() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,pic\n1,https://img.example/x.png\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), text_prop("pic")]);

    let mut rules = rules_for(input);
    rules.image_columns = vec!["pic".to_owned()];
    rules.image_column_keep = true;
    rules.image_mode = ImageMode::Cover;
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(
        rich_text_content(&page.properties["pic"]).unwrap(),
        "https://img.example/x.png"
    );
    assert!(page.cover.is_some());
}

#[tokio::test]
async fn json_input_orders_the_payload_key_column_first() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(
        &dir,
        "data.json",
        br#"[{"b": "x", "name": "1"}, {"name": "2", "b": "y"}]"#,
    );
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("name"), text_prop("b")]);

    let mut rules = rules_for(input);
    rules.payload_key_column = Some("name".to_owned());
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);
    assert_eq!(api.pages_created(), 2);

    let page = api.page_by_title(DB, "2").unwrap();
    assert_eq!(rich_text_content(&page.properties["b"]).unwrap(), "y");
}

#[tokio::test]
async fn guessed_types_round_trip_their_values() {
    // Columns whose guessed type matches the remote type write payloads
    // that preserve the original semantic values.
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(
        &dir,
        "data.csv",
        b"a,c,n,u,e,d\n1,true,2.5,https://x.example/p,a@b.com,2023-01-15\n",
    );
    let api = Arc::new(MockApi::new());
    api.add_database(
        DB,
        "target",
        vec![
            title_prop("a"),
            mock::checkbox_prop("c"),
            number_prop("n"),
            mock::url_prop("u"),
            mock::email_prop("e"),
            mock::date_prop("d"),
        ],
    );

    let status = run(&api, rules_for(input)).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["c"]["checkbox"], true);
    assert_eq!(page.properties["n"]["number"], 2.5);
    assert_eq!(page.properties["u"]["url"], "https://x.example/p");
    assert_eq!(page.properties["e"]["email"], "a@b.com");
    assert_eq!(page.properties["d"]["date"]["start"], "2023-01-15");
    // open-ended dates serialize without an end
    assert!(page.properties["d"]["date"].get("end").is_none());
}

#[tokio::test]
async fn mandatory_columns_reject_values_that_convert_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(&dir, "data.csv", b"a,n\n1,5\n2,not a number\n");
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), number_prop("n")]);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Number]);
    rules.mandatory_columns = vec!["n".to_owned()];
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::RowFailures(1));
    assert_eq!(api.pages_created(), 1);
}

#[tokio::test]
async fn date_ranges_write_start_and_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_file(
        &dir,
        "data.csv",
        b"a,d\n1,2023-01-01 .. 2023-02-01\n",
    );
    let api = Arc::new(MockApi::new());
    api.add_database(DB, "target", vec![title_prop("a"), mock::date_prop("d")]);

    let mut rules = rules_for(input);
    rules.column_types = Some(vec![ColumnType::Date]);
    let status = run(&api, rules).await.unwrap();
    assert_eq!(status, RunStatus::Clean);

    let page = api.page_by_title(DB, "1").unwrap();
    assert_eq!(page.properties["d"]["date"]["start"], "2023-01-01");
    assert_eq!(page.properties["d"]["date"]["end"], "2023-02-01");
}
