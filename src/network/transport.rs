use libp2p::core::muxing::StreamMuxerBox;
use libp2p::core::transport::Boxed;
use libp2p::core::upgrade::Version;
use libp2p::{PeerId, Transport, dns, identity, noise, tcp, yamux};

use crate::error::ChatError;

/// TCP with DNS resolution, so bootstrap entries may use `/dns4/<host>/...`.
///
/// Every connection is authenticated with noise under the session key and
/// multiplexed with yamux.
pub fn build_transport(
    local_key: &identity::Keypair,
) -> Result<Boxed<(PeerId, StreamMuxerBox)>, ChatError> {
    let noise_config =
        noise::Config::new(local_key).map_err(|err| ChatError::Transport(err.to_string()))?;

    let tcp = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));
    let resolving = dns::tokio::Transport::system(tcp)?;

    Ok(resolving
        .upgrade(Version::V1)
        .authenticate(noise_config)
        .multiplex(yamux::Config::default())
        .boxed())
}
