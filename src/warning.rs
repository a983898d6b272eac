//! Per-row warning collection.
//!
//! Conversion and upload run inside worker tasks; a task-local
//! collector lets deeply nested code attach warnings to the row being
//! processed without threading a sink through every call. Outside a
//! collection scope warnings fall through to the log.

use std::cell::RefCell;

use tracing::warn;

tokio::task_local! {
    static ROW_WARNINGS: RefCell<Vec<String>>;
}

/// Record a warning against the row currently being processed. Called
/// outside a row scope, the warning goes to the log instead.
pub fn collect(message: impl Into<String>) {
    let message = message.into();
    let collected = ROW_WARNINGS.try_with(|warnings| {
        warnings.borrow_mut().push(message.clone());
    });
    if collected.is_err() {
        warn!("{message}");
    }
}

/// Run a future with row-warning collection enabled and return whatever
/// it produced together with the warnings it emitted.
pub async fn scope<F, T>(f: F) -> (T, Vec<String>)
where
    F: std::future::Future<Output = T>,
{
    ROW_WARNINGS
        .scope(RefCell::new(Vec::new()), async {
            let result = f.await;
            let warnings = ROW_WARNINGS.with(|w| std::mem::take(&mut *w.borrow_mut()));
            (result, warnings)
        })
        .await
}

/// Emit a warning attributed to the current row.
#[macro_export]
macro_rules! warn_row {
    ($($arg:tt)*) => {
        $crate::warning::collect(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warnings_are_scoped_to_the_row() {
        let ((), warnings) = scope(async {
            collect("first");
            warn_row!("second {}", 2);
        })
        .await;
        assert_eq!(warnings, ["first", "second 2"]);
    }

    #[tokio::test]
    async fn nested_scopes_do_not_leak() {
        let ((), outer) = scope(async {
            collect("outer");
            let ((), inner) = scope(async {
                collect("inner");
            })
            .await;
            assert_eq!(inner, ["inner"]);
        })
        .await;
        assert_eq!(outer, ["outer"]);
    }
}
