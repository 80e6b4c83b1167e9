use std::path::{Path, PathBuf};

use crate::collaborators::{AnalysisScript, AudioRecording};
use crate::common::placeholders::{
    CONFIG_BASENAME_PLACEHOLDER, CONFIG_DIR_PLACEHOLDER, CONFIG_PLACEHOLDER, ID_PLACEHOLDER,
    LATITUDE_PLACEHOLDER, LONGITUDE_PLACEHOLDER, OUTPUT_DIR_PLACEHOLDER, PlaceholderMap,
    PlaceholderValue, SOURCE_BASENAME_PLACEHOLDER, SOURCE_DIR_PLACEHOLDER, SOURCE_PLACEHOLDER,
    TEMP_DIR_PLACEHOLDER, TIMESTAMP_PLACEHOLDER, UUID_PLACEHOLDER,
};
use crate::job::item::JobItem;

/// Directories of a single item on the cluster.
///
/// `<root>/<job id>/<script id>/<recording id>/` is the working directory of the submitted job
/// and holds the `source`, `config`, `output` and `temp` directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLayout {
    pub working_directory: PathBuf,
    pub source_dir: PathBuf,
    pub config_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl ItemLayout {
    pub fn new(root: &Path, item: &JobItem) -> Self {
        let working_directory = root
            .join(item.analysis_job_id.to_string())
            .join(item.script_id.to_string())
            .join(item.audio_recording_id.to_string());
        Self {
            source_dir: working_directory.join("source"),
            config_dir: working_directory.join("config"),
            output_dir: working_directory.join("output"),
            temp_dir: working_directory.join("temp"),
            working_directory,
        }
    }
}

/// Values of all template placeholders for one item.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub layout: ItemLayout,
    pub source: PathBuf,
    pub config: Option<PathBuf>,
    values: PlaceholderMap,
}

/// Keeps only the last component of `name`, a file cannot escape the directory it is put in.
fn file_name_only(name: &str, fallback: impl FnOnce() -> String) -> String {
    match Path::new(name).file_name() {
        Some(file_name) => file_name.to_string_lossy().into_owned(),
        None => fallback(),
    }
}

fn path_value(path: &Path) -> Option<PlaceholderValue> {
    Some(PlaceholderValue::Text(path.display().to_string()))
}

impl CommandContext {
    pub fn new(layout: ItemLayout, recording: &AudioRecording, script: &AnalysisScript) -> Self {
        let source_name = file_name_only(&recording.original_file_name, || {
            format!("{}.audio", recording.uuid)
        });
        let config_name = script.config.as_ref().map(|_| {
            file_name_only(script.config_file_name(), || "config.yml".to_string())
        });
        let source = layout.source_dir.join(&source_name);
        let config = config_name.as_ref().map(|name| layout.config_dir.join(name));

        let mut values = PlaceholderMap::new();
        let mut set = |name: &str, value: Option<PlaceholderValue>| {
            values.insert(name.to_string(), value);
        };
        set(SOURCE_DIR_PLACEHOLDER, path_value(&layout.source_dir));
        set(CONFIG_DIR_PLACEHOLDER, path_value(&layout.config_dir));
        set(OUTPUT_DIR_PLACEHOLDER, path_value(&layout.output_dir));
        set(TEMP_DIR_PLACEHOLDER, path_value(&layout.temp_dir));
        set(SOURCE_BASENAME_PLACEHOLDER, Some(source_name.into()));
        set(CONFIG_BASENAME_PLACEHOLDER, config_name.map(Into::into));
        set(SOURCE_PLACEHOLDER, path_value(&source));
        set(CONFIG_PLACEHOLDER, config.as_deref().and_then(path_value));
        set(LATITUDE_PLACEHOLDER, recording.latitude.map(Into::into));
        set(LONGITUDE_PLACEHOLDER, recording.longitude.map(Into::into));
        set(TIMESTAMP_PLACEHOLDER, Some(recording.recorded_date.into()));
        set(ID_PLACEHOLDER, Some(recording.id.as_num().into()));
        set(UUID_PLACEHOLDER, Some(recording.uuid.to_string().into()));

        Self {
            layout,
            source,
            config,
            values,
        }
    }

    pub fn values(&self) -> &PlaceholderMap {
        &self.values
    }
}
