//! Background task spawning that hides the native/WASM split.
//!
//! Native builds run fetches on a Tokio runtime (reqwest needs one); WASM
//! builds use Bevy's `AsyncComputeTaskPool`, where reqwest goes through the
//! browser's `fetch`.

use std::future::Future;

use bevy::prelude::*;

/// Installs the async runtime for the current platform.
pub struct AsyncRuntimePlugin;

impl Plugin for AsyncRuntimePlugin {
    fn build(&self, app: &mut App) {
        #[cfg(target_family = "wasm")]
        let _ = app;

        #[cfg(not(target_family = "wasm"))]
        app.add_plugins(bevy_tokio_tasks::TokioTasksPlugin::default());
    }
}

#[cfg(not(target_family = "wasm"))]
mod native {
    use bevy::ecs::system::SystemParam;
    use bevy::prelude::*;

    use super::Future;

    /// System parameter for spawning async work.
    #[derive(SystemParam)]
    pub struct TaskSpawner<'w, 's> {
        runtime: Res<'w, bevy_tokio_tasks::TokioTasksRuntime>,
        // Keeps the lifetime parameters identical to the WASM variant.
        #[allow(dead_code)]
        _local: Local<'s, ()>,
    }

    impl TaskSpawner<'_, '_> {
        /// Run `future` to completion in the background.
        pub fn spawn<F>(&self, future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            self.runtime.spawn_background_task(move |_ctx| future);
        }

        /// Run `future` and send its output on `tx`.
        ///
        /// A closed channel drops the output.
        pub fn spawn_into<F, T>(&self, future: F, tx: async_channel::Sender<T>)
        where
            F: Future<Output = T> + Send + 'static,
            T: Send + 'static,
        {
            self.spawn(super::deliver(future, tx));
        }
    }
}

#[cfg(target_family = "wasm")]
mod wasm {
    use bevy::ecs::system::SystemParam;
    use bevy::prelude::*;
    use bevy::tasks::AsyncComputeTaskPool;

    use super::Future;

    /// System parameter for spawning async work.
    ///
    /// No runtime resource exists on WASM, so this holds only placeholders.
    #[derive(SystemParam)]
    pub struct TaskSpawner<'w, 's> {
        #[allow(dead_code)]
        _local: Local<'s, ()>,
        #[allow(dead_code)]
        _marker: std::marker::PhantomData<&'w ()>,
    }

    impl TaskSpawner<'_, '_> {
        /// Run `future` to completion on the browser's event loop.
        pub fn spawn<F>(&self, future: F)
        where
            F: Future<Output = ()> + 'static,
        {
            AsyncComputeTaskPool::get().spawn_local(future).detach();
        }

        /// Run `future` and send its output on `tx`.
        pub fn spawn_into<F, T>(&self, future: F, tx: async_channel::Sender<T>)
        where
            F: Future<Output = T> + 'static,
            T: 'static,
        {
            self.spawn(super::deliver(future, tx));
        }
    }
}

async fn deliver<F, T>(future: F, tx: async_channel::Sender<T>)
where
    F: Future<Output = T>,
{
    let output = future.await;
    if tx.send(output).await.is_err() {
        tracing::debug!("task result dropped, receiver closed");
    }
}

#[cfg(not(target_family = "wasm"))]
pub use native::TaskSpawner;
#[cfg(target_family = "wasm")]
pub use wasm::TaskSpawner;
