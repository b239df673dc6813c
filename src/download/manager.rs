use crate::download::{DownloadError, DownloadProvider};
use crate::events::EventHub;
use crate::import::{ImportManager, ModelFamily, ProgressNotification};
use crate::library::LibraryError;
use crate::model::{log_prefix, Importable};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

/// A download currently in flight
#[derive(Debug, Clone)]
pub struct DownloadRequest<M> {
    pub model: M,
    pub notification: ProgressNotification,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent<M> {
    Began(M),
    /// Downloaded and imported; carries the imported model
    Completed(M),
    /// Network failure, cancellation, or an import that produced nothing
    Failed(M),
}

/// Bridges a download provider into the import pipeline
///
/// Keeps at most one request per model in flight. Finished downloads are
/// imported as paths through the family's [`ImportManager`].
pub struct DownloadManager<F: ModelFamily> {
    importer: ImportManager<F>,
    provider: Option<Arc<dyn DownloadProvider<F::Model>>>,
    in_flight: Arc<Mutex<Vec<DownloadRequest<F::Model>>>>,
    events: EventHub<DownloadEvent<F::Model>>,
    runtime_handle: tokio::runtime::Handle,
}

impl<F: ModelFamily> Clone for DownloadManager<F> {
    fn clone(&self) -> Self {
        DownloadManager {
            importer: self.importer.clone(),
            provider: self.provider.clone(),
            in_flight: self.in_flight.clone(),
            events: self.events.clone(),
            runtime_handle: self.runtime_handle.clone(),
        }
    }
}

impl<F: ModelFamily> DownloadManager<F> {
    /// `provider` of `None` means no network source is configured and every
    /// download request is refused
    pub fn new(
        importer: ImportManager<F>,
        provider: Option<Arc<dyn DownloadProvider<F::Model>>>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        DownloadManager {
            importer,
            provider,
            in_flight: Arc::new(Mutex::new(Vec::new())),
            events: EventHub::new(),
            runtime_handle,
        }
    }

    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<DownloadEvent<F::Model>> {
        self.events.subscribe()
    }

    /// Start downloading `model` in the background.
    ///
    /// Returns false if a download for an equal model is already running or
    /// no provider is configured.
    pub fn download(&self, model: &F::Model) -> bool {
        let Some(provider) = self.provider.clone() else {
            warn!(
                "{} No download provider configured for {}",
                log_prefix(Some(model)),
                model.display_name()
            );
            return false;
        };

        let notification = self.importer.post_notification();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.iter().any(|r| r.model == *model) {
                debug!(
                    "{} Download of {} already in progress",
                    log_prefix(Some(model)),
                    model.display_name()
                );
                return false;
            }
            in_flight.push(DownloadRequest {
                model: model.clone(),
                notification: notification.clone(),
            });
        }

        notification.set_progress(0.0, format!("Downloading {}", model.display_name()));
        self.events.publish(DownloadEvent::Began(model.clone()));

        let this = self.clone();
        let model = model.clone();
        self.runtime_handle.spawn(async move {
            let result = this.run_download(provider, &model, &notification).await;
            this.in_flight.lock().unwrap().retain(|r| r.model != model);

            match result {
                Ok(imported) => {
                    notification.set_completion_text(format!("Imported {}!", imported.display_name()));
                    notification.complete();
                    this.events.publish(DownloadEvent::Completed(imported));
                }
                Err(e) => {
                    if e.is_cancelled() {
                        debug!("{} Download cancelled", log_prefix(Some(&model)));
                        notification.cancel();
                    } else {
                        error!(
                            "{} Download of {} failed: {}",
                            log_prefix(Some(&model)),
                            model.display_name(),
                            e
                        );
                        notification.fail(format!("Download of {} failed!", model.display_name()));
                    }
                    this.events.publish(DownloadEvent::Failed(model));
                }
            }
        });

        true
    }

    async fn run_download(
        &self,
        provider: Arc<dyn DownloadProvider<F::Model>>,
        model: &F::Model,
        notification: &ProgressNotification,
    ) -> Result<F::Model, DownloadError> {
        let path = provider.fetch(model, notification).await?;
        let imported = self
            .importer
            .import_path(&path, notification.cancel_token().child())
            .await;
        remove_download(&path).await;

        match imported? {
            Some(model) => {
                info!("{} Download imported", log_prefix(Some(&model)));
                Ok(model)
            }
            None => Err(DownloadError::NothingImported(
                self.importer.family().name().to_string(),
            )),
        }
    }

    /// The in-flight request for a model equal to `model`, if any
    pub fn get_existing_download(&self, model: &F::Model) -> Option<DownloadRequest<F::Model>> {
        self.in_flight
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.model == *model)
            .cloned()
    }

    /// Request cancellation of the in-flight download for `model`
    pub fn cancel(&self, model: &F::Model) -> bool {
        match self.get_existing_download(model) {
            Some(request) => {
                request.notification.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether `model` can be used without downloading it
    pub async fn is_available_locally(&self, model: &F::Model) -> Result<bool, LibraryError> {
        let stored = match model.id() {
            Some(id) => self.importer.library().get(id).await?,
            None => None,
        };
        Ok(self
            .importer
            .family()
            .check_local_availability(model, stored.as_ref()))
    }
}

async fn remove_download(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not delete downloaded file ({}): {}", path.display(), e),
    }
}
