use super::Orchestrator;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::media::sink::{RemoteTrack, TrackSink};
use crate::media::source::LocalMedia;
use crate::negotiator::SessionHandle;
use crate::peer::types::Mode;
use std::sync::Arc;

impl Orchestrator {
    /// WHEP: negotiate a receive-only session and hand every remote track to
    /// `sink`.
    pub async fn view(
        &self,
        config: &SessionConfig,
        sink: Arc<dyn TrackSink>,
    ) -> Result<SessionHandle> {
        let emitter = self.emitter.clone();
        let result = async {
            let endpoint = self.begin(config).await?;
            self.attempt(config, endpoint, Mode::View, LocalMedia::default(), |transport| {
                transport.on_remote_track(Box::new(move |track: RemoteTrack| {
                    emitter.emit_remote_track(track.info.clone());
                    sink.attach(track);
                }));
            })
            .await
        }
        .await;
        self.report(result)
    }
}
