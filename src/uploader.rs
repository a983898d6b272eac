//! The upload pipeline: orchestration and the bounded worker pool.
//!
//! `run_upload` wires the stages together: read the file, reconcile the
//! schema, then stream rows through workers that each convert and write
//! exactly one row. Row processing is not order-preserving across
//! workers; a single worker gives deterministic order. Per-row errors
//! are collected and reported at the end; only fatal errors (lost
//! authorization) stop the run early.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::caption::CaptionProvider;
use crate::config::ConversionRules;
use crate::convert::{ConversionError, ConvertedRow, RowConverter};
use crate::input::{LocalData, ReadOptions, Row};
use crate::notion::api::{ApiError, NotionApi};
use crate::notion::database::NotionDatabase;
use crate::notion::types::{CreatePageRequest, Parent, UpdatePageRequest};
use crate::notion::upload::FileUploader;
use crate::progress::{Phase, ProgressReporter};
use crate::schema::{self, WriteSchema};
use crate::{input, warning};

#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error(transparent)]
    Input(#[from] input::Error),
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum RowFailure {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("write failed: {0}")]
    Write(ApiError),
}

impl RowFailure {
    fn fatal_api(&self) -> Option<&ApiError> {
        let api = match self {
            RowFailure::Conversion(ConversionError::Api(err)) => err,
            RowFailure::Write(err) => err,
            _ => return None,
        };
        api.is_fatal().then_some(api)
    }
}

/// One failed row: its 1-based position in the input and the cause.
#[derive(Debug)]
pub struct RowError {
    pub row: usize,
    pub source: RowFailure,
}

#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub total: usize,
    pub succeeded: usize,
    pub errors: Vec<RowError>,
}

/// How the run ended, short of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    RowFailures(usize),
}

/// Run the full upload pipeline against an already-resolved database.
pub async fn run_upload(
    rules: ConversionRules,
    api: Arc<dyn NotionApi>,
    database_id: &str,
    reporter: Arc<dyn ProgressReporter>,
    caption_provider: Option<Arc<dyn CaptionProvider>>,
) -> Result<RunStatus, FatalError> {
    reporter.set_phase(Phase::LoadingInput);
    let read_options = ReadOptions {
        delimiter: rules.delimiter,
        fail_on_duplicate_columns: rules.fail.on_duplicate_csv_columns,
        payload_key_column: rules.payload_key_column.as_deref(),
    };
    let mut data = LocalData::load(&rules.input_file, &read_options, rules.column_types.as_deref())?;
    if let Some(caption) = &rules.caption {
        data.add_text_column(&caption.target_column);
    }
    info!(
        file = %rules.input_file.display(),
        rows = data.len(),
        columns = data.columns().len(),
        "input loaded"
    );

    reporter.set_phase(Phase::ValidatingSchema);
    let db = Arc::new(NotionDatabase::load(Arc::clone(&api), database_id).await?);
    let write_schema = Arc::new(schema::reconcile(&mut data, &db, &rules).await?);

    reporter.set_phase(Phase::Uploading);
    reporter.register_rows(data.len());

    let rules = Arc::new(rules);
    let uploader = Arc::new(FileUploader::new(Arc::clone(&api)));
    let converter = Arc::new(RowConverter::new(
        Arc::clone(&db),
        Arc::clone(&write_schema),
        Arc::clone(&rules),
        uploader,
        caption_provider,
    ));

    let rows: Vec<(usize, Row)> = data
        .rows()
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, row)| (i + 1, row))
        .collect();

    let dispatcher = Dispatcher {
        api,
        db,
        schema: write_schema,
        converter,
        rules: Arc::clone(&rules),
        reporter: Arc::clone(&reporter),
    };
    let (outcome, fatal) = dispatcher.dispatch(rows).await;

    if let Some(fatal) = fatal {
        reporter.set_phase(Phase::Failed(fatal.to_string()));
        reporter.finish();
        return Err(FatalError::Api(fatal));
    }

    if outcome.errors.is_empty() {
        reporter.set_phase(Phase::Completed);
    } else {
        error!(
            failed = outcome.errors.len(),
            total = outcome.total,
            "some rows failed to upload"
        );
    }
    reporter.finish();

    Ok(if outcome.errors.is_empty() {
        RunStatus::Clean
    } else {
        RunStatus::RowFailures(outcome.errors.len())
    })
}

/// Archive every entry of the database.
pub async fn run_delete_all(
    api: Arc<dyn NotionApi>,
    database_id: &str,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<RunStatus, FatalError> {
    reporter.set_phase(Phase::Archiving);
    let db = NotionDatabase::load(api, database_id).await?;
    let (archived, failed) = db
        .archive_all(
            |total| reporter.register_rows(total),
            |page_id, result| match result {
                Ok(()) => reporter.row_succeeded(page_id, &[]),
                Err(err) => reporter.row_failed(page_id, &err.to_string()),
            },
        )
        .await?;

    if archived > 0 {
        info!(archived, "archived database entries");
    }
    reporter.set_phase(Phase::Completed);
    reporter.finish();
    Ok(if failed == 0 {
        RunStatus::Clean
    } else {
        RunStatus::RowFailures(failed)
    })
}

struct Dispatcher {
    api: Arc<dyn NotionApi>,
    db: Arc<NotionDatabase>,
    schema: Arc<WriteSchema>,
    converter: Arc<RowConverter>,
    rules: Arc<ConversionRules>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Dispatcher {
    /// Drain the rows through the worker pool. Returns the aggregate
    /// outcome, plus the fatal error that stopped dispatch early, if
    /// any.
    async fn dispatch(&self, rows: Vec<(usize, Row)>) -> (UploadOutcome, Option<ApiError>) {
        let total = rows.len();
        let workers = self.rules.max_threads.max(1);

        if workers == 1 {
            return self.dispatch_sequential(rows).await;
        }

        let semaphore = Arc::new(Semaphore::new(workers));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut join_set: JoinSet<Option<(usize, Result<(), RowFailure>)>> = JoinSet::new();

        for (index, row) in rows {
            let semaphore = Arc::clone(&semaphore);
            let cancelled = Arc::clone(&cancelled);
            let worker = Worker {
                db: Arc::clone(&self.db),
                schema: Arc::clone(&self.schema),
                converter: Arc::clone(&self.converter),
                rules: Arc::clone(&self.rules),
                api: Arc::clone(&self.api),
                reporter: Arc::clone(&self.reporter),
            };
            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                // On a fatal error the queue drains without dispatching
                // more work; rows already past this check finish.
                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }
                let result = worker.process(index, &row).await;
                if result
                    .as_ref()
                    .err()
                    .and_then(RowFailure::fatal_api)
                    .is_some()
                {
                    cancelled.store(true, Ordering::SeqCst);
                }
                Some((index, result))
            });
        }

        let mut outcome = UploadOutcome {
            total,
            ..Default::default()
        };
        let mut fatal = None;
        while let Some(joined) = join_set.join_next().await {
            let Ok(Some((index, result))) = joined else {
                continue;
            };
            match result {
                Ok(()) => outcome.succeeded += 1,
                Err(failure) => {
                    if let Some(api_err) = failure.fatal_api() {
                        if fatal.is_none() {
                            fatal = Some(clone_fatal(api_err));
                        }
                    }
                    outcome.errors.push(RowError {
                        row: index,
                        source: failure,
                    });
                }
            }
        }
        outcome.errors.sort_by_key(|e| e.row);
        (outcome, fatal)
    }

    async fn dispatch_sequential(
        &self,
        rows: Vec<(usize, Row)>,
    ) -> (UploadOutcome, Option<ApiError>) {
        let mut outcome = UploadOutcome {
            total: rows.len(),
            ..Default::default()
        };
        let worker = Worker {
            db: Arc::clone(&self.db),
            schema: Arc::clone(&self.schema),
            converter: Arc::clone(&self.converter),
            rules: Arc::clone(&self.rules),
            api: Arc::clone(&self.api),
            reporter: Arc::clone(&self.reporter),
        };
        for (index, row) in rows {
            match worker.process(index, &row).await {
                Ok(()) => outcome.succeeded += 1,
                Err(failure) => {
                    let fatal = failure.fatal_api().map(clone_fatal);
                    outcome.errors.push(RowError {
                        row: index,
                        source: failure,
                    });
                    if fatal.is_some() {
                        return (outcome, fatal);
                    }
                }
            }
        }
        (outcome, None)
    }
}

/// `ApiError` holds a `reqwest::Error` in one variant and cannot be
/// `Clone`; fatal errors are always the cloneable kind.
fn clone_fatal(err: &ApiError) -> ApiError {
    match err {
        ApiError::Unauthorized { message } => ApiError::Unauthorized {
            message: message.clone(),
        },
        other => ApiError::Unauthorized {
            message: other.to_string(),
        },
    }
}

struct Worker {
    db: Arc<NotionDatabase>,
    schema: Arc<WriteSchema>,
    converter: Arc<RowConverter>,
    rules: Arc<ConversionRules>,
    api: Arc<dyn NotionApi>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Worker {
    /// Convert and upload exactly one row, reporting the result.
    async fn process(&self, index: usize, row: &Row) -> Result<(), RowFailure> {
        let label = format!("row {index}");
        let (result, warnings) = warning::scope(self.process_inner(row)).await;
        match &result {
            Ok(()) => self.reporter.row_succeeded(&label, &warnings),
            Err(failure) => {
                for warning in &warnings {
                    self.reporter.log_warn(&format!("{label}: {warning}"));
                }
                self.reporter.row_failed(&label, &failure.to_string());
            }
        }
        result
    }

    async fn process_inner(&self, row: &Row) -> Result<(), RowFailure> {
        let converted = self.converter.convert(row).await?;
        self.write_row(converted).await.map_err(RowFailure::Write)
    }

    /// Merge-or-insert plus decoration. The create/update carries the
    /// icon and cover so a failure surfaces as one error for the row;
    /// the image blocks follow and may leave partial page state, which
    /// is tolerated but reported.
    async fn write_row(&self, converted: ConvertedRow) -> Result<(), ApiError> {
        let ConvertedRow {
            key,
            mut properties,
            icon,
            cover,
            image_blocks,
        } = converted;

        let existing = if self.rules.merge {
            self.db.row_for_key(&key).await
        } else {
            None
        };

        let page_id = match existing {
            Some(remote) => {
                // the key column itself is never rewritten on merge
                properties.shift_remove(&self.schema.key.property);
                let request = UpdatePageRequest {
                    properties: Some(properties),
                    icon,
                    cover,
                    archived: None,
                };
                self.api.update_page(&remote.page_id, &request).await?;
                remote.page_id
            }
            None => {
                let request = CreatePageRequest {
                    parent: Parent {
                        database_id: self.db.database_id.clone(),
                    },
                    properties,
                    icon,
                    cover,
                };
                let page = self.api.create_page(&request).await?;
                if self.rules.merge {
                    // later same-key rows in this run update this page
                    self.db.publish_row(&key, &page.id).await;
                }
                page.id
            }
        };

        if !image_blocks.is_empty() {
            self.api.append_blocks(&page_id, &image_blocks).await?;
        }
        Ok(())
    }
}
