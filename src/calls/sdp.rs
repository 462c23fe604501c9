//! Offer/answer steps shared by both coordinators.

use rtccore::media::{MediaError, PeerConnection, SessionDescription};
use std::sync::Arc;

/// Create an offer and install it as the local description.
pub(crate) async fn local_offer(
    connection: Arc<dyn PeerConnection>,
) -> Result<SessionDescription, MediaError> {
    let offer = connection.create_offer().await?;
    connection.set_local_description(offer.clone()).await?;
    Ok(offer)
}

/// Create an answer to the applied remote offer and install it locally.
pub(crate) async fn local_answer(
    connection: Arc<dyn PeerConnection>,
) -> Result<SessionDescription, MediaError> {
    let answer = connection.create_answer().await?;
    connection.set_local_description(answer.clone()).await?;
    Ok(answer)
}

/// Apply a remote offer, then answer it.
pub(crate) async fn answer_offer(
    connection: Arc<dyn PeerConnection>,
    offer: SessionDescription,
) -> Result<SessionDescription, MediaError> {
    connection.set_remote_description(offer).await?;
    local_answer(connection).await
}
