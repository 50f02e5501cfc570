use super::Orchestrator;
use crate::config::SessionConfig;
use crate::error::Result;
use crate::media::source::MediaSource;
use crate::negotiator::SessionHandle;
use crate::peer::types::Mode;

impl Orchestrator {
    /// WHIP: acquire local media, then negotiate a send-only session.
    ///
    /// Config and media errors come back before any transport exists.
    pub async fn publish(
        &self,
        config: &SessionConfig,
        source: &dyn MediaSource,
    ) -> Result<SessionHandle> {
        let result = async {
            let endpoint = self.begin(config).await?;
            let media = source.acquire(&config.media).await?;
            self.attempt(config, endpoint, Mode::Publish, media, |_| {})
                .await
        }
        .await;
        self.report(result)
    }
}
