use crate::download::{DownloadError, DownloadProvider};
use crate::import::ProgressNotification;
use crate::model::Importable;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// Downloads archives over HTTP from a URL template
///
/// `{name}` in the template is replaced by the model's display name.
pub struct HttpDownloadProvider {
    client: Client,
    url_template: String,
    downloads_dir: PathBuf,
}

impl HttpDownloadProvider {
    pub fn new(url_template: &str, downloads_dir: &Path) -> Self {
        HttpDownloadProvider {
            client: Client::new(),
            url_template: url_template.to_string(),
            downloads_dir: downloads_dir.to_path_buf(),
        }
    }

    pub fn url_for(&self, name: &str) -> String {
        self.url_template.replace("{name}", name)
    }
}

#[async_trait::async_trait]
impl<M: Importable> DownloadProvider<M> for HttpDownloadProvider {
    async fn fetch(
        &self,
        model: &M,
        notification: &ProgressNotification,
    ) -> Result<PathBuf, DownloadError> {
        let url = self.url_for(&model.display_name());
        debug!("Requesting {}", url);

        let mut response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Unavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        tokio::fs::create_dir_all(&self.downloads_dir).await?;
        let path = self
            .downloads_dir
            .join(format!("{}.download", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;

        let total = response.content_length();
        let mut received: u64 = 0;
        let text = format!("Downloading {}", model.display_name());

        loop {
            if notification.is_cancel_requested() {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(DownloadError::Cancelled);
            }

            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                notification.set_progress(received as f32 / total as f32, text.clone());
            }
        }
        file.flush().await?;

        info!("Downloaded {} bytes from {}", received, url);
        Ok(path)
    }
}
