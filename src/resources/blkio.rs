//! Blkio resource: proportional weights and per-device throttles.

use std::sync::Arc;

use nix::unistd::Pid;

use super::handler::{
    destroy_or_return, AnyController, CgroupHandlerFactory, HandlerCore, HasHandlerCore,
};
use super::{DestroyError, ResourceHandler, ResourceHandlerFactory, ResourceType};
use crate::cgroup::blkio::{
    BlkioController, BlkioControllerFactory, BLKIO_IO_SERVICED, BLKIO_IO_SERVICE_BYTES,
    BLKIO_IO_SERVICE_TIME, BLKIO_MERGED, BLKIO_QUEUED, BLKIO_SECTORS, BLKIO_THROTTLE_READ_BPS,
    BLKIO_THROTTLE_READ_IOPS, BLKIO_THROTTLE_WRITE_BPS, BLKIO_THROTTLE_WRITE_IOPS, BLKIO_TIME,
    BLKIO_WAIT_TIME,
};
use crate::cgroup::CgroupFactory;
use crate::common::ContainerName;
use crate::events::{EventCallback, NotificationId};
use crate::spec::{BlkioSpec, ContainerSpec, EventSpec, StatsType, UpdatePolicy};
use crate::stats::{set_if_present, ContainerStats};
use crate::status::Status;

/// Kernel default for `blkio.weight`.
const DEFAULT_WEIGHT: u64 = 500;

pub struct BlkioResourceHandlerFactory {
    blkio: BlkioControllerFactory,
}

impl BlkioResourceHandlerFactory {
    pub fn new(cgroups: &Arc<CgroupFactory>) -> Result<Self, Status> {
        if !cgroups.is_mounted(BlkioControllerFactory::hierarchy_type()) {
            return Err(Status::not_found(
                "blkio resource depends on the blkio cgroup hierarchy",
            ));
        }

        Ok(BlkioResourceHandlerFactory {
            blkio: BlkioControllerFactory::new(Arc::clone(cgroups)),
        })
    }

    fn handler(
        &self,
        container_name: &ContainerName,
        controller: BlkioController,
    ) -> Box<dyn ResourceHandler> {
        Box::new(BlkioResourceHandler {
            core: HandlerCore::new(
                container_name.clone(),
                ResourceType::Blkio,
                vec![AnyController::Blkio(controller)],
            ),
        })
    }
}

impl CgroupHandlerFactory for BlkioResourceHandlerFactory {
    fn get_resource_handler(
        &self,
        container_name: &ContainerName,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.blkio.get(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }

    fn create_resource_handler(
        &self,
        container_name: &ContainerName,
        _spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        let controller = self.blkio.create(container_name.to_path())?;
        Ok(self.handler(container_name, controller))
    }
}

impl ResourceHandlerFactory for BlkioResourceHandlerFactory {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Blkio
    }

    fn get(&self, container_name: &str) -> Result<Box<dyn ResourceHandler>, Status> {
        self.get_handler(container_name)
    }

    fn create(
        &self,
        container_name: &str,
        spec: &ContainerSpec,
    ) -> Result<Box<dyn ResourceHandler>, Status> {
        self.create_handler(container_name, spec)
    }
}

#[derive(Debug)]
struct BlkioResourceHandler {
    core: HandlerCore,
}

impl BlkioResourceHandler {
    /// Throttles are written as given under both policies; the kernel
    /// keeps per-device entries until they are overwritten with rate 0.
    fn apply(&self, blkio: &BlkioSpec, policy: UpdatePolicy) -> Result<(), Status> {
        let controller = self.core.blkio()?;

        match (blkio.weight, policy) {
            (Some(weight), _) => controller.set_weight(weight)?,
            (None, UpdatePolicy::Replace) => controller.set_weight(DEFAULT_WEIGHT)?,
            (None, UpdatePolicy::Diff) => {}
        }

        for device_weight in &blkio.device_weights {
            controller.set_device_weight(
                device_weight.major,
                device_weight.minor,
                device_weight.weight,
            )?;
        }

        for (file, throttles) in [
            (BLKIO_THROTTLE_READ_BPS, &blkio.throttle_read_bps),
            (BLKIO_THROTTLE_WRITE_BPS, &blkio.throttle_write_bps),
            (BLKIO_THROTTLE_READ_IOPS, &blkio.throttle_read_iops),
            (BLKIO_THROTTLE_WRITE_IOPS, &blkio.throttle_write_iops),
        ] {
            for throttle in throttles {
                controller.set_throttle(file, throttle)?;
            }
        }

        Ok(())
    }
}

impl HasHandlerCore for BlkioResourceHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }
}

impl ResourceHandler for BlkioResourceHandler {
    fn container_name(&self) -> &str {
        self.core.container_name().as_str()
    }

    fn resource_type(&self) -> ResourceType {
        self.core.resource_type()
    }

    fn update(&self, spec: &ContainerSpec, policy: UpdatePolicy) -> Result<(), Status> {
        let _guard = self.core.lock_updates();
        tracing::debug!("applying blkio config for {}", self.core.container_name());

        match (&spec.blkio, policy) {
            (Some(blkio), _) => self.apply(blkio, policy),
            (None, UpdatePolicy::Replace) => self.apply(&BlkioSpec::default(), policy),
            (None, UpdatePolicy::Diff) => Ok(()),
        }
    }

    fn stats(&self, kind: StatsType, output: &mut ContainerStats) -> Result<(), Status> {
        let controller = self.core.blkio()?;
        let stats = output.blkio.get_or_insert_with(Default::default);

        set_if_present(
            controller.get_device_stats(BLKIO_IO_SERVICE_BYTES),
            &mut stats.service_bytes,
        )?;
        set_if_present(
            controller.get_device_stats(BLKIO_IO_SERVICED),
            &mut stats.serviced,
        )?;

        if matches!(kind, StatsType::Full) {
            set_if_present(controller.get_device_stats(BLKIO_TIME), &mut stats.time)?;
            set_if_present(
                controller.get_device_stats(BLKIO_SECTORS),
                &mut stats.sectors,
            )?;
            set_if_present(
                controller.get_device_stats(BLKIO_IO_SERVICE_TIME),
                &mut stats.service_time,
            )?;
            set_if_present(
                controller.get_device_stats(BLKIO_WAIT_TIME),
                &mut stats.wait_time,
            )?;
            set_if_present(controller.get_device_stats(BLKIO_QUEUED), &mut stats.queued)?;
            set_if_present(controller.get_device_stats(BLKIO_MERGED), &mut stats.merged)?;
        }

        Ok(())
    }

    fn spec(&self, output: &mut ContainerSpec) -> Result<(), Status> {
        let controller = self.core.blkio()?;
        let blkio = output.blkio.get_or_insert_with(Default::default);

        set_if_present(controller.get_weight(), &mut blkio.weight)?;

        for (file, throttles) in [
            (BLKIO_THROTTLE_READ_BPS, &mut blkio.throttle_read_bps),
            (BLKIO_THROTTLE_WRITE_BPS, &mut blkio.throttle_write_bps),
            (BLKIO_THROTTLE_READ_IOPS, &mut blkio.throttle_read_iops),
            (BLKIO_THROTTLE_WRITE_IOPS, &mut blkio.throttle_write_iops),
        ] {
            match controller.get_throttles(file) {
                Ok(parsed) => *throttles = parsed,
                Err(status) if status.is_not_found() => {}
                Err(status) => return Err(status),
            }
        }

        Ok(())
    }

    fn register_notification(
        &self,
        _event: &EventSpec,
        _callback: EventCallback,
    ) -> Result<NotificationId, Status> {
        Err(Status::not_found("no handled event found"))
    }

    fn enter(&self, tids: &[Pid]) -> Result<(), Status> {
        self.core.enter_all(tids)
    }

    fn destroy(self: Box<Self>) -> Result<(), DestroyError> {
        destroy_or_return(self)
    }
}
