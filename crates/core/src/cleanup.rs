//! Best-effort removal of a task's on-disk artifacts.
//!
//! Every deletion is guarded independently: a missing file is not an
//! error, and one failed deletion never aborts the rest. Cleanup must not
//! block the owning operation, so failures are logged and swallowed.

use sq_protocol::config_models::EngineConfig;
use sq_protocol::task_models::Task;
use std::path::{Path, PathBuf};

/// Remove every artifact belonging to `task`.
///
/// Covers the input artifact, the recorded output artifact with its
/// `.recovery` and `.status` siblings, the fallback output naming pattern
/// derived from the unique input name (for tasks that failed before a
/// result was recorded), and the per-task log file.
pub fn cleanup_files(task: &Task, config: &EngineConfig) {
    remove_file_best_effort(&task.input_path);

    remove_result_set(&task.output_path);

    // Fallback pattern: {unique_stem}{suffix}.{ext} in the results
    // directory. Distinct from output_path when the canonical path was
    // never derived from this input.
    let fallback = config
        .results_dir
        .join(fallback_result_name(&task.unique_filename, &config.result_suffix));
    if fallback != task.output_path {
        remove_result_set(&fallback);
    }

    if let Some(log_name) = &task.log_filename {
        remove_file_best_effort(&config.logs_dir.join(log_name));
    }
}

fn fallback_result_name(unique_filename: &str, suffix: &str) -> String {
    let path = Path::new(unique_filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| unique_filename.to_string());
    match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    }
}

/// Remove a result artifact together with its solver-written siblings.
fn remove_result_set(path: &Path) {
    remove_file_best_effort(path);
    remove_file_best_effort(&sibling(path, "recovery"));
    remove_file_best_effort(&sibling(path, "status"));
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{suffix}"));
    PathBuf::from(name)
}

fn remove_file_best_effort(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sq_protocol::task_models::Priority;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn task_in(dir: &Path, config: &EngineConfig) -> Task {
        let unique = "model_20250101_120000_ab12cd34.mph";
        Task::new(
            Uuid::new_v4(),
            "model.mph".to_string(),
            unique.to_string(),
            dir.join(unique),
            config
                .results_dir
                .join("model_20250101_120000_ab12cd34_solved.mph"),
            Priority::Normal,
        )
    }

    fn config_in(dir: &Path) -> EngineConfig {
        EngineConfig {
            results_dir: dir.join("results"),
            logs_dir: dir.join("logs"),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_removes_all_artifacts() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.results_dir).unwrap();
        std::fs::create_dir_all(&config.logs_dir).unwrap();

        let mut task = task_in(dir.path(), &config);
        task.log_filename = Some("run.log".to_string());

        std::fs::write(&task.input_path, b"in").unwrap();
        std::fs::write(&task.output_path, b"out").unwrap();
        std::fs::write(sibling(&task.output_path, "recovery"), b"r").unwrap();
        std::fs::write(sibling(&task.output_path, "status"), b"s").unwrap();
        std::fs::write(config.logs_dir.join("run.log"), b"log").unwrap();

        cleanup_files(&task, &config);

        assert!(!task.input_path.exists());
        assert!(!task.output_path.exists());
        assert!(!sibling(&task.output_path, "recovery").exists());
        assert!(!sibling(&task.output_path, "status").exists());
        assert!(!config.logs_dir.join("run.log").exists());
    }

    #[test]
    fn test_missing_output_does_not_stop_log_removal() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.logs_dir).unwrap();

        let mut task = task_in(dir.path(), &config);
        task.log_filename = Some("run.log".to_string());
        std::fs::write(config.logs_dir.join("run.log"), b"log").unwrap();

        // No input, no output, no siblings on disk.
        cleanup_files(&task, &config);

        assert!(!config.logs_dir.join("run.log").exists());
    }

    #[test]
    fn test_fallback_result_name() {
        assert_eq!(
            fallback_result_name("model_x.mph", "_solved"),
            "model_x_solved.mph"
        );
        assert_eq!(fallback_result_name("noext", "_solved"), "noext_solved");
    }

    #[test]
    fn test_fallback_pattern_is_removed_for_failed_task() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::create_dir_all(&config.results_dir).unwrap();

        let mut task = task_in(dir.path(), &config);
        // Simulate a task whose canonical output path was never recorded.
        task.output_path = dir.path().join("unset.mph");

        let fallback = config
            .results_dir
            .join("model_20250101_120000_ab12cd34_solved.mph");
        std::fs::write(&fallback, b"partial").unwrap();
        std::fs::write(sibling(&fallback, "recovery"), b"r").unwrap();

        cleanup_files(&task, &config);

        assert!(!fallback.exists());
        assert!(!sibling(&fallback, "recovery").exists());
    }
}
