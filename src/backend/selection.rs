// Device selection - pick the best GPU for the surface
//
// Every physical device is snapshotted into a DeviceCandidate, candidates
// that cannot drive the surface are dropped, and the rest are ranked by an
// integer score. Scoring works on plain data so it can run without a GPU.

use ash::vk;
use std::ffi::{c_char, CStr, CString};

use super::error::{BackendError, BackendResult, VkResultExt};

/// Depth formats tried in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 2] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Channel count reported for whichever depth candidate matched.
///
/// D24_UNORM_S8_UINT only has 3 channels but is still reported as 4.
pub const DEPTH_CHANNEL_COUNT: u8 = 4;

const DISCRETE_GPU_BONUS: i64 = 10_000;
const DEVICE_LOCAL_HOST_VISIBLE_BONUS: i64 = 100;

/// Device extensions a candidate must expose.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Capabilities of one queue family as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub queue_count: u32,
    pub supports_present: bool,
}

/// Queue family roles; `None` until resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub transfer: Option<u32>,
    pub compute: Option<u32>,
}

/// Queue families of a selected device; the mandatory roles are always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
            transfer: self.transfer?,
            compute: self.compute,
        })
    }
}

/// Everything the selector needs to know about one physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: Vec<QueueFamilyInfo>,
    /// Format properties of each entry of `DEPTH_FORMAT_CANDIDATES`.
    pub depth_format_properties: Vec<(vk::Format, vk::FormatProperties)>,
    pub extensions: Vec<CString>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// The selected physical device with its resolved capabilities.
#[derive(Debug, Clone)]
pub struct GraphicsDevice {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
    /// Number of queues available in each family, indexed by family.
    pub family_queue_counts: Vec<u32>,
    pub depth_format: vk::Format,
    pub depth_channel_count: u8,
    pub supports_device_local_host_visible: bool,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl GraphicsDevice {
    pub fn name(&self) -> String {
        device_name(&self.properties)
    }
}

pub fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Resolve queue family roles in a single pass.
///
/// Graphics prefers a family that can also present. Present takes the first
/// present-capable family. Transfer starts on the first compute family, but a
/// transfer-capable family with a strictly lower capability score takes over,
/// which approximates "most likely a dedicated transfer queue".
pub fn resolve_queue_families(families: &[QueueFamilyInfo]) -> QueueFamilyIndices {
    let mut indices = QueueFamilyIndices::default();
    let mut min_transfer_score = u8::MAX;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let mut score = 0u8;

        if family.flags.contains(vk::QueueFlags::GRAPHICS) {
            score += 1;
            if family.supports_present || indices.graphics.is_none() {
                indices.graphics = Some(i);
            }
        }

        if family.supports_present {
            score += 1;
            indices.present.get_or_insert(i);
        }

        if family.flags.contains(vk::QueueFlags::COMPUTE) {
            score += 1;
            indices.compute.get_or_insert(i);
            indices.transfer.get_or_insert(i);
        }

        if family.flags.contains(vk::QueueFlags::TRANSFER) && score < min_transfer_score {
            min_transfer_score = score;
            indices.transfer = Some(i);
        }
    }

    indices
}

/// First depth candidate usable as a depth/stencil attachment.
pub fn select_depth_format(properties: &[(vk::Format, vk::FormatProperties)]) -> Option<vk::Format> {
    let required = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    DEPTH_FORMAT_CANDIDATES.iter().copied().find(|candidate| {
        properties.iter().any(|(format, props)| {
            format == candidate
                && (props.linear_tiling_features.contains(required)
                    || props.optimal_tiling_features.contains(required))
        })
    })
}

pub fn supports_device_local_host_visible(memory: &vk::PhysicalDeviceMemoryProperties) -> bool {
    let wanted = vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE;
    memory.memory_types[..memory.memory_type_count as usize]
        .iter()
        .any(|ty| ty.property_flags.contains(wanted))
}

pub fn has_required_extensions(extensions: &[CString]) -> bool {
    required_device_extensions()
        .iter()
        .all(|required| extensions.iter().any(|ext| ext.as_c_str() == *required))
}

/// Score a device: +10000 if discrete, + max 2D image dimension,
/// +100 if some memory type is both device-local and host-visible.
pub fn score(properties: &vk::PhysicalDeviceProperties, device_local_host_visible: bool) -> i64 {
    let mut score = 0;
    if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
        score += DISCRETE_GPU_BONUS;
    }
    score += i64::from(properties.limits.max_image_dimension2_d);
    if device_local_host_visible {
        score += DEVICE_LOCAL_HOST_VISIBLE_BONUS;
    }
    score
}

/// Turn a candidate into a usable device, or explain why it was excluded.
fn evaluate(candidate: DeviceCandidate) -> Result<GraphicsDevice, &'static str> {
    let queue_families = resolve_queue_families(&candidate.queue_families)
        .complete()
        .ok_or("missing a graphics, present or transfer queue family")?;
    let depth_format =
        select_depth_format(&candidate.depth_format_properties).ok_or("no supported depth format")?;
    if !has_required_extensions(&candidate.extensions) {
        return Err("missing required device extensions");
    }
    if candidate.surface_formats.is_empty() || candidate.present_modes.is_empty() {
        return Err("surface reports no formats or present modes");
    }

    Ok(GraphicsDevice {
        physical_device: candidate.physical_device,
        supports_device_local_host_visible: supports_device_local_host_visible(
            &candidate.memory_properties,
        ),
        properties: candidate.properties,
        features: candidate.features,
        memory_properties: candidate.memory_properties,
        queue_families,
        family_queue_counts: candidate.queue_families.iter().map(|f| f.queue_count).collect(),
        depth_format,
        depth_channel_count: DEPTH_CHANNEL_COUNT,
        surface_formats: candidate.surface_formats,
        present_modes: candidate.present_modes,
    })
}

/// Pick the highest scoring usable device. Ties keep the first one enumerated.
pub fn select_device(candidates: Vec<DeviceCandidate>) -> BackendResult<GraphicsDevice> {
    let mut best: Option<(i64, GraphicsDevice)> = None;

    for candidate in candidates {
        let name = device_name(&candidate.properties);
        let device = match evaluate(candidate) {
            Ok(device) => device,
            Err(reason) => {
                log::info!("Skipping GPU {}: {}", name, reason);
                continue;
            }
        };

        let score = score(&device.properties, device.supports_device_local_host_visible);
        log::debug!("GPU {} scored {}", name, score);

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, device));
        }
    }

    let (_, device) = best.ok_or(BackendError::NoSuitableDevice)?;
    log::info!("Selected GPU: {}", device.name());
    Ok(device)
}

/// Snapshot every physical device the instance exposes.
pub fn query_candidates(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> BackendResult<Vec<DeviceCandidate>> {
    let physical_devices =
        unsafe { instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")?;

    if physical_devices.is_empty() {
        log::error!("No GPUs with Vulkan support");
        return Err(BackendError::NoSuitableDevice);
    }

    Ok(usable_candidates(physical_devices.into_iter().map(|pd| {
        (pd, query_candidate(instance, surface_loader, surface, pd))
    })))
}

/// Drop devices whose queries failed. Selection only fails when no device
/// is left.
fn usable_candidates<I>(results: I) -> Vec<DeviceCandidate>
where
    I: IntoIterator<Item = (vk::PhysicalDevice, BackendResult<DeviceCandidate>)>,
{
    results
        .into_iter()
        .filter_map(|(physical_device, result)| match result {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::warn!("Skipping physical device {:?}: {}", physical_device, e);
                None
            }
        })
        .collect()
}

fn query_candidate(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> BackendResult<DeviceCandidate> {
    unsafe {
        let queue_families = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .enumerate()
            .map(|(i, family)| QueueFamilyInfo {
                flags: family.queue_flags,
                queue_count: family.queue_count,
                supports_present: surface_loader
                    .get_physical_device_surface_support(physical_device, i as u32, surface)
                    .unwrap_or_else(|e| {
                        log::warn!("Present support query for queue family {} failed: {}", i, e);
                        false
                    }),
            })
            .collect();

        let depth_format_properties = DEPTH_FORMAT_CANDIDATES
            .iter()
            .map(|&format| {
                (
                    format,
                    instance.get_physical_device_format_properties(physical_device, format),
                )
            })
            .collect();

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .op("vkEnumerateDeviceExtensionProperties")?
            .iter()
            .map(|ext| CStr::from_ptr(ext.extension_name.as_ptr() as *const c_char).to_owned())
            .collect();

        Ok(DeviceCandidate {
            physical_device,
            properties: instance.get_physical_device_properties(physical_device),
            features: instance.get_physical_device_features(physical_device),
            memory_properties: instance.get_physical_device_memory_properties(physical_device),
            queue_families,
            depth_format_properties,
            extensions,
            surface_formats: surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
        })
    }
}
