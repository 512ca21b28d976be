use crate::error::Error;
use bytes::Bytes;
use futures::stream::BoxStream;
use google_cloud_storage::client::google_cloud_auth;
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use log::info;
use reqwest::Body;
use std::fmt;

/// A stream of body chunks, used to pipe report downloads straight into uploads.
pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// Location of a staged object: bucket plus object name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    pub bucket: String,
    pub name: String,
}

impl ObjectPath {
    pub fn new(bucket: &str, name: &str) -> Self {
        ObjectPath {
            bucket: bucket.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gs://{}/{}", self.bucket, self.name)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Writes `body` to `path`, replacing any object already there.
    /// Returns once the whole stream has been consumed and stored.
    async fn write_stream(&self, path: &ObjectPath, body: ByteStream) -> Result<(), Error>;

    /// Reads the full contents of the object at `path`.
    async fn read(&self, path: &ObjectPath) -> Result<Bytes, Error>;
}

/// Google Cloud Storage through `google-cloud-storage`.
pub struct GcsStore {
    client: Client,
}

impl GcsStore {
    pub async fn connect(credentials_path: &str) -> Result<Self, Error> {
        let credentials_error = |err: google_cloud_auth::error::Error| Error::Credentials {
            path: credentials_path.to_string(),
            message: err.to_string(),
        };

        let credentials = CredentialsFile::new_from_file(credentials_path.to_string())
            .await
            .map_err(credentials_error)?;
        let config = ClientConfig::default()
            .with_credentials(credentials)
            .await
            .map_err(credentials_error)?;

        Ok(GcsStore {
            client: Client::new(config),
        })
    }
}

fn upload_request(path: &ObjectPath) -> (UploadObjectRequest, UploadType) {
    let mut media = Media::new(path.name.clone());
    media.content_type = "text/csv".into();

    let request = UploadObjectRequest {
        bucket: path.bucket.clone(),
        ..Default::default()
    };

    (request, UploadType::Simple(media))
}

fn download_request(path: &ObjectPath) -> GetObjectRequest {
    GetObjectRequest {
        bucket: path.bucket.clone(),
        object: path.name.clone(),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl ObjectStore for GcsStore {
    async fn write_stream(&self, path: &ObjectPath, body: ByteStream) -> Result<(), Error> {
        let (request, upload_type) = upload_request(path);

        // streaming upload, the report is never fully buffered
        self.client
            .upload_object(&request, Body::wrap_stream(body), &upload_type)
            .await?;

        info!("wrote {}", path);
        Ok(())
    }

    async fn read(&self, path: &ObjectPath) -> Result<Bytes, Error> {
        let contents = self
            .client
            .download_object(&download_request(path), &Range::default())
            .await?;

        info!("read {} bytes from {}", contents.len(), path);
        Ok(Bytes::from(contents))
    }
}
