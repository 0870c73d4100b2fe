//! Folder manager
//!
//! Every job lives in a namespace-scoped folder that pipesync tags as managed.
//! Only the namespace folder itself is ever created.

use pipesync_core::domain::job::{Folder, FolderDefinition, Item};
use pipesync_core::{ExecutionEngine, Result, SyncError, naming};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::privilege::{PrivilegeProvider, with_privilege};

pub struct FolderManager {
    engine: Arc<dyn ExecutionEngine>,
    privilege: Arc<dyn PrivilegeProvider>,
}

impl FolderManager {
    pub fn new(engine: Arc<dyn ExecutionEngine>, privilege: Arc<dyn PrivilegeProvider>) -> Self {
        Self { engine, privilege }
    }

    /// Folder at `name`, `None` if missing or not a folder
    pub async fn get_folder(&self, name: &str) -> Result<Option<Folder>> {
        let item = with_privilege(&*self.privilege, self.engine.get_item(name)).await?;
        Ok(item.and_then(Item::into_folder))
    }

    /// Returns the managed folder at `name`, creating it if needed
    ///
    /// An existing folder is tagged as managed. A new folder is created with
    /// its description and tag in one call, then read back.
    pub async fn ensure_folder(&self, name: &str) -> Result<Folder> {
        let item = with_privilege(&*self.privilege, self.engine.get_item(name)).await?;

        match item {
            Some(Item::Folder(mut folder)) => {
                if !folder.managed {
                    with_privilege(&*self.privilege, self.engine.tag_folder(name)).await?;
                    debug!("Tagged existing folder {} as managed", name);
                    folder.managed = true;
                }
                Ok(folder)
            }
            Some(other) => {
                error!(
                    "Cannot use '{}' as a folder, it is a {}",
                    name,
                    other.class_name()
                );
                Err(SyncError::Structural(format!(
                    "'{}' exists but is a {}, not a folder",
                    name,
                    other.class_name()
                )))
            }
            None => {
                let definition = FolderDefinition {
                    name: name.to_string(),
                    description: naming::folder_description(name),
                };
                with_privilege(&*self.privilege, self.engine.create_folder(&definition)).await?;

                // Look it up again to be sure the engine kept it
                match self.get_folder(name).await? {
                    Some(folder) => {
                        info!("Created folder {}", name);
                        Ok(folder)
                    }
                    None => Err(SyncError::Projection(format!(
                        "folder '{}' was created but cannot be found",
                        name
                    ))),
                }
            }
        }
    }

    /// Readies the parent folder of a job belonging to `namespace`
    ///
    /// A parent other than the namespace folder must already exist; it is
    /// tagged but never created.
    pub async fn ensure_job_parent(&self, parent: &str, namespace: &str) -> Result<Folder> {
        if parent != namespace {
            let item = with_privilege(&*self.privilege, self.engine.get_item(parent)).await?;
            if item.is_none() {
                return Err(SyncError::Structural(format!(
                    "parent folder '{}' does not exist and only '{}' may be created",
                    parent, namespace
                )));
            }
        }
        self.ensure_folder(parent).await
    }
}
