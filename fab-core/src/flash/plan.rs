use super::step::{FlashStep, ImagePair, OperationKind, Target};
use crate::config::{require_address, require_path, require_str, StationConfig};
use crate::config_states::{UnvalidatedConfig, ValidatedConfig};
use crate::serial::HandshakeSettings;
use fab_error::{ProvisionError, ProvisionResult};
use fab_hal::ImageOps;
use std::path::{Path, PathBuf};
use std::time::Duration;

const S3_FIRMWARE_KEYWORDS: [&str; 4] = ["bootloader", "partition-table", "ota_data_initial", "rc"];
const S3_CERTIFICATE_KEYWORDS: [&str; 2] = ["secure_cert", "partition"];
const H2_FIRMWARE_KEYWORDS: [&str; 3] = ["bootloader", "partition-table", "H2"];

/// Every step of one unit, resolved to concrete ports, addresses and image files.
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    pub tool: String,
    pub tool_timeout: Duration,
    pub s3_certificate: FlashStep,
    pub s3_firmware: FlashStep,
    pub s3_reboot: FlashStep,
    pub s3_mac: FlashStep,
    pub h2_mac: FlashStep,
    pub h2_firmware: FlashStep,
    pub factory: HandshakeSettings,
    pub handshake_timeout: Duration,
    pub report_dir: Option<PathBuf>,
}

fn locate<I: ImageOps + ?Sized>(
    images: &I,
    dir: &Path,
    keyword: &str,
    what: &str,
) -> ProvisionResult<PathBuf> {
    match images.locate_image(dir, keyword) {
        Ok(Some(path)) => Ok(path),
        Ok(None) => Err(ProvisionError::ConfigurationMissing(format!(
            "{} image '{}' in {}",
            what,
            keyword,
            dir.display()
        ))),
        Err(err) => Err(ProvisionError::ConfigurationMissing(format!(
            "{} image '{}' in {}: {}",
            what,
            keyword,
            dir.display(),
            err
        ))),
    }
}

fn pairs<I: ImageOps + ?Sized>(
    images: &I,
    dir: &Path,
    entries: &[(&str, &Option<String>, &str)],
    what: &str,
) -> ProvisionResult<Vec<ImagePair>> {
    entries
        .iter()
        .map(|(keyword, address, key)| -> ProvisionResult<ImagePair> {
            Ok(ImagePair {
                address: require_address(address, key)?.to_string(),
                image: locate(images, dir, keyword, what)?,
            })
        })
        .collect()
}

impl ProvisioningPlan {
    /// Validate `cfg`, then resolve it.
    pub fn from_config<I: ImageOps + ?Sized>(
        cfg: StationConfig,
        images: &I,
    ) -> ProvisionResult<Self> {
        let validated = UnvalidatedConfig::new(cfg).validate()?;
        Self::resolve(&validated, images)
    }

    /// Resolve image files and build each step. Any image that cannot be found is
    /// reported as missing configuration; nothing is spawned or opened here.
    pub fn resolve<I: ImageOps + ?Sized>(
        cfg: &ValidatedConfig<StationConfig>,
        images: &I,
    ) -> ProvisionResult<Self> {
        let cfg = cfg.inner();

        let s3 = &cfg.s3;
        let s3_port = require_str(&s3.port, "s3.port")?;
        let s3_images = require_path(&s3.images, "s3.images")?;
        let s3_certs = require_path(&s3.certificates, "s3.certificates")?;
        let a = &s3.addresses;
        let [boot, table, ota, rc] = S3_FIRMWARE_KEYWORDS;
        let firmware = pairs(
            images,
            s3_images,
            &[
                (boot, &a.bootloader, "s3.addresses.bootloader"),
                (table, &a.partition_table, "s3.addresses.partition_table"),
                (ota, &a.ota_data, "s3.addresses.ota_data"),
                (rc, &a.firmware, "s3.addresses.firmware"),
            ],
            "s3 firmware",
        )?;
        let [cert, provider] = S3_CERTIFICATE_KEYWORDS;
        let certificates = pairs(
            images,
            s3_certs,
            &[
                (cert, &a.secure_cert, "s3.addresses.secure_cert"),
                (provider, &a.data_provider, "s3.addresses.data_provider"),
            ],
            "s3 certificate",
        )?;

        let h2 = &cfg.h2;
        let h2_port = require_str(&h2.port, "h2.port")?;
        let h2_images = require_path(&h2.images, "h2.images")?;
        let a = &h2.addresses;
        let [boot, table, app] = H2_FIRMWARE_KEYWORDS;
        let h2_firmware = pairs(
            images,
            h2_images,
            &[
                (boot, &a.bootloader, "h2.addresses.bootloader"),
                (table, &a.partition_table, "h2.addresses.partition_table"),
                (app, &a.firmware, "h2.addresses.firmware"),
            ],
            "h2 firmware",
        )?;

        let f = &cfg.factory;
        let factory = HandshakeSettings {
            port: require_str(&f.port, "factory.port")?.to_string(),
            baud: f.baud,
            read_timeout: Duration::from_millis(f.read_timeout_ms.max(1)),
            sentinel: f.sentinel.clone(),
            password: require_str(&f.password, "factory.password")?.to_string(),
            command: require_str(&f.command, "factory.command")?.to_string(),
        };

        Ok(Self {
            tool: cfg.tool.trim().to_string(),
            tool_timeout: Duration::from_secs(cfg.tool_timeout_secs),
            s3_certificate: FlashStep::new(
                Target::S3,
                OperationKind::WriteCertificate,
                certificates,
                s3_port,
                s3.baud,
            ),
            s3_firmware: FlashStep::new(
                Target::S3,
                OperationKind::WriteFirmware,
                firmware,
                s3_port,
                s3.baud,
            ),
            s3_reboot: FlashStep::one_shot(Target::S3, OperationKind::Run, s3_port, s3.baud),
            s3_mac: FlashStep::one_shot(Target::S3, OperationKind::ReadMac, s3_port, s3.baud),
            h2_mac: FlashStep::one_shot(Target::H2, OperationKind::ReadMac, h2_port, h2.baud),
            h2_firmware: FlashStep::new(
                Target::H2,
                OperationKind::WriteFirmware,
                h2_firmware,
                h2_port,
                h2.baud,
            ),
            factory,
            handshake_timeout: Duration::from_secs(f.handshake_timeout_secs),
            report_dir: cfg.report_dir.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fab_hal::{FakeHal, Operation};

    fn config() -> StationConfig {
        let mut cfg = StationConfig::default();
        cfg.s3.images = Some(PathBuf::from("fw/s3"));
        cfg.s3.certificates = Some(PathBuf::from("certs"));
        cfg.h2.images = Some(PathBuf::from("fw/h2"));
        let a = &mut cfg.s3.addresses;
        a.bootloader = Some("0x0".into());
        a.partition_table = Some("0x8000".into());
        a.ota_data = Some("0xd000".into());
        a.firmware = Some("0x10000".into());
        a.secure_cert = Some("0xd000".into());
        a.data_provider = Some("0x10000".into());
        let a = &mut cfg.h2.addresses;
        a.bootloader = Some("0x0".into());
        a.partition_table = Some("0x8000".into());
        a.firmware = Some("0x10000".into());
        cfg.factory.password = Some("factory-pass".into());
        cfg.factory.command = Some("led 1".into());
        cfg
    }

    fn images() -> FakeHal {
        let hal = FakeHal::new();
        for keyword in S3_FIRMWARE_KEYWORDS {
            hal.add_image("fw/s3", keyword, format!("fw/s3/{}.bin", keyword));
        }
        for keyword in S3_CERTIFICATE_KEYWORDS {
            hal.add_image("certs", keyword, format!("certs/{}.bin", keyword));
        }
        for keyword in H2_FIRMWARE_KEYWORDS {
            hal.add_image("fw/h2", keyword, format!("fw/h2/{}.bin", keyword));
        }
        hal
    }

    #[test]
    fn resolves_pairs_in_flash_order() {
        let plan = ProvisioningPlan::from_config(config(), &images()).unwrap();
        let addresses: Vec<&str> = plan
            .s3_firmware
            .pairs()
            .iter()
            .map(|p| p.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["0x0", "0x8000", "0xd000", "0x10000"]);
        assert_eq!(
            plan.s3_firmware.pairs()[3].image,
            PathBuf::from("fw/s3/rc.bin")
        );
        assert_eq!(
            plan.s3_certificate.pairs()[0].image,
            PathBuf::from("certs/secure_cert.bin")
        );
        assert_eq!(plan.h2_firmware.pairs()[2].image, PathBuf::from("fw/h2/H2.bin"));
        assert_eq!(plan.h2_firmware.port(), "/dev/ttyUSB2");
        assert_eq!(plan.h2_firmware.baud(), 921_600);
        assert_eq!(plan.factory.port, "/dev/ttyUSB1");
        assert_eq!(plan.factory.sentinel, ".");
        assert_eq!(plan.tool_timeout, Duration::from_secs(600));
    }

    #[test]
    fn missing_image_is_configuration_missing() {
        let hal = FakeHal::new();
        hal.add_image("fw/s3", "bootloader", "fw/s3/bootloader.bin");
        let err = ProvisioningPlan::from_config(config(), &hal).unwrap_err();
        match err {
            ProvisionError::ConfigurationMissing(what) => {
                assert!(what.contains("partition-table"), "{}", what)
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn invalid_config_never_touches_images() {
        let mut cfg = config();
        cfg.factory.password = None;
        let hal = images();
        let err = ProvisioningPlan::from_config(cfg, &hal).unwrap_err();
        assert_eq!(
            err,
            ProvisionError::ConfigurationMissing("factory.password".to_string())
        );
        assert!(!hal.has_operation(|op| matches!(op, Operation::LocateImage { .. })));
    }
}
