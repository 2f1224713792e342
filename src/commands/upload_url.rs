// ABOUTME: Upload-url command: issues one presigned upload URL from the command line
// ABOUTME: Prints the URL on stdout so it can be piped into other tools

use crate::config::StorageConfig;
use crate::upload::{issue_upload_url, S3UploadSigner};
use anyhow::Result;

pub async fn upload_url(storage: &StorageConfig, filename: &str, content_type: &str) -> Result<()> {
    let signer = S3UploadSigner::from_config(storage).await?;
    let credential = issue_upload_url(&signer, filename, content_type).await?;

    tracing::info!(
        "Signed PUT for s3://{}/{} expires in {} minutes",
        signer.bucket(),
        credential.key,
        credential.expires_in.as_secs() / 60
    );
    println!("{}", credential.url);
    Ok(())
}
