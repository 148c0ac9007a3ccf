// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use cnn_interface::{Camera, CnnError};
use cnn_shared::{FrameBuffer, FrameDims};
use log::{error, trace};

/// Owns the shared frame buffer and the camera that fills it. Consumers
/// only ever get shared borrows of the frame.
pub struct FrameBufferPipeline<C> {
    camera: C,
    frame: FrameBuffer,
}

impl<C: Camera> FrameBufferPipeline<C> {
    pub fn new(camera: C, dims: FrameDims) -> Self {
        Self {
            camera,
            frame: FrameBuffer::new(dims),
        }
    }

    /// Configures the camera for the buffer's dimensions.
    pub fn setup(&mut self) -> Result<(), CnnError> {
        let dims = self.frame.dims();
        self.camera.setup(dims).map_err(|err| {
            error!("Camera setup for {} failed: {:?}", dims, err);
            CnnError::CameraSetupFailed
        })
    }

    /// Fills the buffer with a fresh frame. On failure the previous frame is
    /// no longer considered captured.
    pub fn capture(&mut self) -> Result<&FrameBuffer, CnnError> {
        let camera = &mut self.camera;
        self.frame
            .fill_with(|words| camera.capture_into(words))
            .map_err(|err| {
                error!("Capture failed: {:?}", err);
                CnnError::CaptureFailed
            })?;
        trace!("CAPTURE {} words", self.frame.len());
        Ok(&self.frame)
    }

    pub fn frame(&self) -> &FrameBuffer { &self.frame }

    pub fn camera(&self) -> &C { &self.camera }

    pub fn camera_mut(&mut self) -> &mut C { &mut self.camera }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake_cnn_core::FakeCamera;

    #[test]
    fn capture_fills_whole_frame() {
        let mut pipeline = FrameBufferPipeline::new(FakeCamera::new(0x100), FrameDims::new(4, 4));
        pipeline.setup().unwrap();
        assert_eq!(pipeline.camera().dims, Some(FrameDims::new(4, 4)));

        let frame = pipeline.capture().unwrap();
        assert!(frame.is_valid());
        assert_eq!(frame.len(), 16);
        assert_eq!(frame.words()[15], 0x10f);
    }

    #[test]
    fn failed_capture_invalidates_frame() {
        let mut pipeline = FrameBufferPipeline::new(FakeCamera::new(0), FrameDims::new(2, 2));
        pipeline.camera_mut().fail_after = Some(1);
        assert!(pipeline.capture().is_ok());
        assert!(pipeline.frame().is_valid());

        assert_eq!(pipeline.capture().err(), Some(CnnError::CaptureFailed));
        assert!(!pipeline.frame().is_valid());
    }

    #[test]
    fn setup_failure_is_camera_setup_failure() {
        let mut camera = FakeCamera::new(0);
        camera.fail_setup = true;
        let mut pipeline = FrameBufferPipeline::new(camera, FrameDims::new(2, 2));
        assert_eq!(pipeline.setup(), Err(CnnError::CameraSetupFailed));
    }
}
