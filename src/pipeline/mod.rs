//! Capture → throttle → engine → dispatcher → presentation.

#[cfg(feature = "camera-nokhwa")]
pub mod camera;
pub mod capture;
pub mod dispatcher;
pub mod engine;
pub mod frame_ops;
pub mod presenter;
#[cfg(feature = "camera-nokhwa")]
pub mod rgba_converter;
pub mod still;
pub mod texture;
pub mod throttle;

use std::sync::Arc;

use crossbeam_channel::bounded;

pub use capture::{CaptureStream, FrameSink};
pub use dispatcher::{DispatchStats, GeometryUpdate, ResultDispatcher, SceneBatch};
pub use engine::{
    EngineState, GraphEngine, GraphEngineClient, ResultHandler, ResultSink, build_engine,
    default_graph,
};
pub use presenter::{LoggingPresenter, PresentationThread, ScenePresenter, start_presentation};
pub use texture::Texture;
pub use throttle::{Admission, FrameThrottle, InFlightToken, ThrottleStats};

use crate::{
    config::{PipelineConfig, SourceConfig, SourceKind},
    error::{DeviceConfigurationError, GraphLoadError, Result},
    graph::GraphDescription,
};

/// The graph named by the config, or the backend's built-in one.
pub fn load_graph(config: &PipelineConfig) -> Result<GraphDescription, GraphLoadError> {
    match &config.graph.description_path {
        Some(path) => GraphDescription::from_file(path),
        None => GraphDescription::new(default_graph(config.engine.backend)),
    }
}

/// Starts the configured frame source feeding `sink`.
pub fn start_source(
    config: &SourceConfig,
    sink: Arc<dyn FrameSink>,
) -> Result<CaptureStream, DeviceConfigurationError> {
    match config.kind {
        #[cfg(feature = "camera-nokhwa")]
        SourceKind::Camera => camera::start_camera_stream(&config.camera, sink),
        #[cfg(not(feature = "camera-nokhwa"))]
        SourceKind::Camera => {
            let _ = sink;
            Err(DeviceConfigurationError::CameraDisabled)
        }
        SourceKind::Images => {
            let transform = frame_ops::CaptureTransform::from_config(&config.camera);
            still::start_image_stream(&config.images, &transform, sink)
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub throttle: ThrottleStats,
    pub dispatch: DispatchStats,
    /// Engine results that arrived after the result sink closed.
    pub discarded_results: u64,
}

/// A running pipeline. Dropping it tears everything down.
pub struct Pipeline {
    client: Arc<GraphEngineClient>,
    throttle: Arc<FrameThrottle>,
    dispatcher: Arc<ResultDispatcher>,
    source: Option<CaptureStream>,
    presentation: Option<PresentationThread>,
}

impl Pipeline {
    /// Loads `graph` into `engine`, starts the presentation thread and the
    /// engine. Frames are accepted through [`Pipeline::frame_sink`] afterwards.
    pub fn start<P: ScenePresenter>(
        config: &PipelineConfig,
        graph: &GraphDescription,
        engine: Box<dyn GraphEngine>,
        presenter: P,
    ) -> Result<Self> {
        config.validate()?;

        let token = Arc::new(InFlightToken::new());
        let (batch_tx, batch_rx) = bounded(config.pipeline.presentation_queue);
        let dispatcher = Arc::new(ResultDispatcher::new(
            config.graph.profile,
            config.graph.gate_channel,
            (
                config.presenter.viewport_width,
                config.presenter.viewport_height,
            ),
            token.clone(),
            batch_tx,
        ));
        let client = Arc::new(GraphEngineClient::new(engine, dispatcher.clone()));

        match graph.flow_limiter_gate() {
            Some(stream) => log::info!(
                "graph limits flow on `{stream}`; in-flight slot is released by {} results",
                config.graph.gate_channel.label()
            ),
            None => log::debug!("graph has no flow limiter back edge"),
        }
        client.initialize(graph)?;

        let presentation = start_presentation(presenter, batch_rx)?;
        client.start()?;

        let throttle = Arc::new(FrameThrottle::new(
            token,
            client.clone(),
            config.pipeline.in_flight_timeout(),
        ));
        log::info!(
            "{} pipeline running ({} gate)",
            config.graph.profile.label(),
            config.graph.gate_channel.label()
        );

        Ok(Self {
            client,
            throttle,
            dispatcher,
            source: None,
            presentation: Some(presentation),
        })
    }

    pub fn frame_sink(&self) -> Arc<dyn FrameSink> {
        self.throttle.clone()
    }

    pub fn throttle(&self) -> &FrameThrottle {
        &self.throttle
    }

    /// Starts the configured source and keeps it until the pipeline stops.
    pub fn attach_source(&mut self, config: &SourceConfig) -> Result<()> {
        let stream = start_source(config, self.frame_sink())?;
        self.source = Some(stream);
        Ok(())
    }

    /// True when an attached source ran out of frames.
    pub fn source_finished(&self) -> bool {
        self.source.as_ref().is_some_and(CaptureStream::is_finished)
    }

    pub fn engine_state(&self) -> EngineState {
        self.client.state()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            throttle: self.throttle.stats(),
            dispatch: self.dispatcher.stats(),
            discarded_results: self.client.discarded_results(),
        }
    }

    pub fn stop(mut self) -> PipelineStats {
        self.shutdown();
        self.stats()
    }

    fn shutdown(&mut self) {
        if let Some(source) = self.source.take() {
            source.stop();
        }

        // No dispatch can start once the client has stopped.
        self.client.stop();
        if let Some(held) = self.throttle.token().force_release() {
            log::debug!("released in-flight slot held by frame {held:?}");
        }

        if let Some(presentation) = self.presentation.take() {
            let presented = presentation.stop();
            log::info!("pipeline stopped after presenting {presented} frames");
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineBackend;

    #[test]
    fn default_graph_follows_backend() {
        let mut config = PipelineConfig::default();
        let graph = load_graph(&config).unwrap();
        assert!(graph.calculators().contains(&"PassThroughCalculator"));

        config.engine.backend = EngineBackend::Ort;
        let graph = load_graph(&config).unwrap();
        assert!(graph.calculators().contains(&"HandLandmarkCpu"));
    }

    #[test]
    fn graph_file_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.pbtxt");
        std::fs::write(&path, "node {\n  calculator: \"PassThroughCalculator\"\n}\n").unwrap();

        let mut config = PipelineConfig::default();
        config.graph.description_path = Some(path);
        let graph = load_graph(&config).unwrap();
        assert_eq!(graph.calculators(), vec!["PassThroughCalculator"]);
        assert!(!graph.has_flow_limiter());
    }

    #[test]
    fn image_source_requires_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SourceConfig {
            kind: SourceKind::Images,
            ..SourceConfig::default()
        };
        config.images.dir = dir.path().to_path_buf();

        let pipeline = Pipeline::start(
            &PipelineConfig::default(),
            &load_graph(&PipelineConfig::default()).unwrap(),
            Box::new(engine::passthrough::PassthroughEngine::new()),
            LoggingPresenter::default(),
        )
        .unwrap();
        let err = start_source(&config, pipeline.frame_sink()).unwrap_err();
        assert!(matches!(err, DeviceConfigurationError::NoImages(_)));
        pipeline.stop();
    }
}
