use crate::archive::ArchiveReader;
use crate::file_store::FileStoreManager;
use crate::import::{CancellationToken, ImportError, ModelFamily};
use crate::model::{Importable, ModelInfo};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

const SKIN_INI: &str = "skin.ini";

/// A user interface skin: images, sounds and a `skin.ini`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkinInfo {
    #[serde(skip)]
    pub info: ModelInfo,
    pub name: String,
    pub creator: String,
}

impl SkinInfo {
    pub fn new(name: &str, creator: &str) -> Self {
        SkinInfo {
            info: ModelInfo::default(),
            name: name.to_string(),
            creator: creator.to_string(),
        }
    }
}

impl Importable for SkinInfo {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut ModelInfo {
        &mut self.info
    }

    fn display_name(&self) -> String {
        if self.creator.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, self.creator)
        }
    }
}

/// Values read from the `[General]` section of a `skin.ini`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinIniMetadata {
    pub name: Option<String>,
    pub author: Option<String>,
}

/// Parse the `[General]` section of a `skin.ini`.
///
/// Keys are case-insensitive; `//` starts a comment line; empty values are ignored.
pub fn parse_skin_ini(contents: &str) -> SkinIniMetadata {
    let mut metadata = SkinIniMetadata::default();
    let mut in_general = false;

    for line in contents.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            in_general = line[1..line.len() - 1].trim().eq_ignore_ascii_case("general");
            continue;
        }

        if !in_general {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim().to_ascii_lowercase().as_str() {
            "name" => metadata.name = Some(value.to_string()),
            "author" => metadata.author = Some(value.to_string()),
            _ => {}
        }
    }

    metadata
}

/// Skins, imported from `.osk` packages or folders
#[derive(Debug, Default, Clone)]
pub struct SkinFamily;

#[async_trait::async_trait]
impl ModelFamily for SkinFamily {
    type Model = SkinInfo;

    fn name(&self) -> &str {
        "skin"
    }

    fn hashable_extensions(&self) -> &[&str] {
        &[".ini"]
    }

    fn handled_extensions(&self) -> &[&str] {
        &[".osk"]
    }

    fn create_model(&self, archive: &mut dyn ArchiveReader) -> Result<Option<SkinInfo>, ImportError> {
        let name = Path::new(archive.name())
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.name().to_string());
        Ok(Some(SkinInfo::new(&name, "")))
    }

    async fn populate(
        &self,
        model: &mut SkinInfo,
        _archive: Option<&mut (dyn ArchiveReader + 'static)>,
        files: &FileStoreManager,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        let Some(ini) = model
            .files()
            .iter()
            .find(|f| f.filename.eq_ignore_ascii_case(SKIN_INI))
            .cloned()
        else {
            debug!("{} has no {}", model.name, SKIN_INI);
            return Ok(());
        };

        let data = files.open_read(&ini.handle).await?;
        cancel.check()?;

        let metadata = parse_skin_ini(&String::from_utf8_lossy(&data));
        if let Some(name) = metadata.name {
            model.name = name;
        }
        if let Some(author) = metadata.author {
            model.creator = author;
        }
        Ok(())
    }

    fn should_delete_archive(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("osk"))
    }

    fn legacy_import_path(&self) -> Option<&str> {
        Some("Skins")
    }
}
