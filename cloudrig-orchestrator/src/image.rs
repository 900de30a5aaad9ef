use cloudrig_common::ownership::ownership_tag;
use cloudrig_common::{CloudrigError, CopyImageRequest};
use tokio_util::sync::CancellationToken;

use crate::context::CloudrigContext;
use crate::lifecycle::{self, StopOutcome};
use crate::polling::bounded_wait;

pub const STOCK_IMAGE_ID: &str = "ami-f0d0d293";
pub const STOCK_IMAGE_REGION: &str = "ap-southeast-2";
pub const STOCK_IMAGE_NAME: &str = "cloudrig";

async fn wait_available(
    ctx: &CloudrigContext,
    image_id: &str,
    cancel: &CancellationToken,
) -> Result<(), CloudrigError> {
    tracing::info!("[image] waiting for {} to become available", image_id);
    bounded_wait(
        "image available",
        image_id,
        ctx.config().timeouts.image,
        cancel,
        ctx.gateway().wait_for_image_available(image_id),
    )
    .await
}

async fn tag_owned(ctx: &CloudrigContext, image_id: &str) -> Result<(), CloudrigError> {
    ctx.gateway()
        .create_tags(image_id, &[ownership_tag()])
        .await
        .map_err(|e| CloudrigError::mutation(format!("tag image {}", image_id), e))
}

/// Copy the stock image into the configured region and take ownership of it.
pub async fn create_image(
    ctx: &CloudrigContext,
    cancel: &CancellationToken,
) -> Result<String, CloudrigError> {
    let request = CopyImageRequest {
        name: STOCK_IMAGE_NAME.to_string(),
        source_image_id: STOCK_IMAGE_ID.to_string(),
        source_region: STOCK_IMAGE_REGION.to_string(),
    };
    tracing::info!(
        "[image] copying {} from {}",
        request.source_image_id,
        request.source_region
    );
    let image_id = ctx
        .gateway()
        .copy_image(&request)
        .await
        .map_err(|e| CloudrigError::mutation(format!("copy image {}", STOCK_IMAGE_ID), e))?;

    wait_available(ctx, &image_id, cancel).await?;
    tag_owned(ctx, &image_id).await?;
    tracing::info!("✅ [image] {} ready", image_id);
    Ok(image_id)
}

/// Capture `instance_id` into a new image and move the ownership tag onto it.
///
/// Not atomic. A failure between untagging the old image and tagging the new
/// one leaves nothing tagged; the next `setup()` asks for an image again.
pub async fn update_image(
    ctx: &CloudrigContext,
    instance_id: &str,
    old_image_id: &str,
    cancel: &CancellationToken,
) -> Result<String, CloudrigError> {
    let gw = ctx.gateway();
    let name = format!(
        "{}-{}",
        STOCK_IMAGE_NAME,
        chrono::Utc::now().timestamp_millis()
    );

    tracing::info!("[image] creating '{}' from {}", name, instance_id);
    let image_id = gw
        .create_image_from_instance(instance_id, &name, true)
        .await
        .map_err(|e| {
            CloudrigError::mutation(format!("create image from {}", instance_id), e)
        })?;

    wait_available(ctx, &image_id, cancel).await?;

    tracing::info!("[image] releasing {}", old_image_id);
    gw.delete_tags(old_image_id, &[ownership_tag()])
        .await
        .map_err(|e| CloudrigError::mutation(format!("untag image {}", old_image_id), e))?;

    tag_owned(ctx, &image_id).await?;
    ctx.set_image_id(&image_id).await;
    tracing::info!("✅ [image] {} replaced by {}", old_image_id, image_id);
    Ok(image_id)
}

/// Snapshot the active instance over the image currently in use.
pub async fn snapshot_current(
    ctx: &CloudrigContext,
    cancel: &CancellationToken,
) -> Result<String, CloudrigError> {
    let instance = lifecycle::active_instance(ctx).await?;
    let old_image_id = ctx.settings().await.image_id.ok_or_else(|| {
        CloudrigError::precondition("no image is recorded in settings; run setup first")
    })?;
    update_image(ctx, &instance.instance_id, &old_image_id, cancel).await
}

/// Snapshot, then stop. The stop only runs once the new image is tagged.
pub async fn snapshot_and_stop(
    ctx: &CloudrigContext,
    cancel: &CancellationToken,
) -> Result<(String, StopOutcome), CloudrigError> {
    let image_id = snapshot_current(ctx, cancel).await?;
    let stopped = lifecycle::stop(ctx, cancel).await?;
    Ok((image_id, stopped))
}
