//! Classification of AWS SDK errors.
//!
//! Every SDK error carries a service error code. Teardown, waiting and the
//! cleanup sweep only care about a handful of categories, so codes are
//! sorted into an [`ErrorKind`] once, here.

use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata};
use snafu::Snafu;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The resource does not exist. Deleting it again is a success.
    NotFound,
    AlreadyExists,
    /// Rate limited.
    Throttled,
    /// Something still uses the resource, or it is mid transition.
    DependencyViolation,
    /// A freshly created IAM entity is not visible to the calling service yet.
    Propagation,
    Other,
}

const NOT_FOUND_CODES: &[&str] = &[
    "NotFound",
    "NoSuchBucket",
    "NoSuchKey",
    "NoSuchBucketPolicy",
    "NoSuchEntity",
    "ReplicationConfigurationNotFoundError",
    "InvalidGroup.NotFound",
    "InvalidGroupId.NotFound",
    "InvalidPermission.NotFound",
    "InvalidInstanceID.NotFound",
    "InvalidLaunchTemplateId.NotFound",
    "InvalidLaunchTemplateName.NotFoundException",
    "ResourceNotFoundException",
    "TrailNotFoundException",
    "TargetGroupNotFound",
    "LoadBalancerNotFound",
    "DBInstanceNotFound",
    "DBInstanceNotFoundFault",
    "ClusterNotFound",
    "ClusterNotFoundFault",
    "WAFNonexistentItemException",
];

const ALREADY_EXISTS_CODES: &[&str] = &[
    "EntityAlreadyExists",
    "BucketAlreadyOwnedByYou",
    "InvalidGroup.Duplicate",
    "InvalidPermission.Duplicate",
    "InvalidLaunchTemplateName.AlreadyExistsException",
    "ResourceAlreadyExistsException",
    "TrailAlreadyExistsException",
    "DuplicateTargetGroupName",
    "AlreadyExists",
    "DBInstanceAlreadyExists",
    "ResourceConflictException",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "TooManyRequestsException",
    "SlowDown",
    "ProvisionedThroughputExceededException",
    "PriorRequestNotComplete",
];

const DEPENDENCY_CODES: &[&str] = &[
    "DependencyViolation",
    "DeleteConflict",
    "ResourceInUse",
    "ResourceInUseException",
    "ScalingActivityInProgress",
    "InvalidDBInstanceState",
    "InvalidDBInstanceStateFault",
    "OperationAborted",
    "ContinuousBackupsUnavailableException",
    "InvalidClusterState",
    "InvalidClusterStateFault",
    "OperationInProgressFailure",
    "WAFOptimisticLockException",
    "WAFAssociatedItemException",
];

const PROPAGATION_CODES: &[&str] = &[
    "InvalidCloudWatchLogsLogGroupArnException",
    "InvalidCloudWatchLogsRoleArnException",
];

impl ErrorKind {
    pub fn from_code(code: Option<&str>, message: Option<&str>) -> Self {
        let message = message.unwrap_or_default();
        match code {
            Some(c) if NOT_FOUND_CODES.contains(&c) => ErrorKind::NotFound,
            // Auto Scaling reports missing groups as a validation error
            Some("ValidationError") if message.contains("not found") => ErrorKind::NotFound,
            // So does Elastic Beanstalk
            Some("InvalidParameterValue")
                if message.starts_with("No Environment found")
                    || message.starts_with("No Application named") =>
            {
                ErrorKind::NotFound
            }
            Some(c) if ALREADY_EXISTS_CODES.contains(&c) => ErrorKind::AlreadyExists,
            Some(c) if THROTTLING_CODES.contains(&c) => ErrorKind::Throttled,
            Some(c) if DEPENDENCY_CODES.contains(&c) => ErrorKind::DependencyViolation,
            Some(c) if PROPAGATION_CODES.contains(&c) => ErrorKind::Propagation,
            Some(_) if message.contains("cannot be assumed") => ErrorKind::Propagation,
            Some(_) if message.contains("Invalid IAM Instance Profile") => ErrorKind::Propagation,
            _ => ErrorKind::Other,
        }
    }

    /// Classifies any SDK error through its error metadata.
    pub fn of(error: &impl ProvideErrorMetadata) -> Self {
        Self::from_code(error.code(), error.message())
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Throttled | ErrorKind::DependencyViolation | ErrorKind::Propagation
        )
    }
}

/// A classified SDK error together with the operation that failed.
#[derive(Debug, Snafu)]
#[snafu(display("{operation} failed ({}): {message}", code.as_deref().unwrap_or("no error code")))]
pub struct AwsError {
    pub kind: ErrorKind,
    pub operation: String,
    pub code: Option<String>,
    pub message: String,
}

impl AwsError {
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

pub trait ClassifyExt<T> {
    /// Converts an SDK error into an [`AwsError`] named after `operation`.
    fn classify(self, operation: impl Into<String>) -> Result<T, AwsError>;
}

impl<T, E> ClassifyExt<T> for Result<T, E>
where
    E: ProvideErrorMetadata + std::error::Error,
{
    fn classify(self, operation: impl Into<String>) -> Result<T, AwsError> {
        self.map_err(|e| AwsError {
            kind: ErrorKind::of(&e),
            operation: operation.into(),
            code: e.code().map(str::to_owned),
            message: format!("{}", DisplayErrorContext(&e)),
        })
    }
}

pub trait NotFoundExt<T> {
    /// Turns a not-found error into `Ok(None)`.
    fn or_not_found(self) -> Result<Option<T>, AwsError>;
}

impl<T> NotFoundExt<T> for Result<T, AwsError> {
    fn or_not_found(self) -> Result<Option<T>, AwsError> {
        match self {
            Ok(t) => Ok(Some(t)),
            Err(e) if e.is_not_found() => {
                log::debug!("  {} found nothing: {}", e.operation, e.message);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classifies_codes_across_services() {
        for code in ["NoSuchBucket", "NoSuchEntity", "InvalidGroup.NotFound", "DBInstanceNotFound"] {
            assert_eq!(ErrorKind::NotFound, ErrorKind::from_code(Some(code), None), "{code}");
        }
        assert_eq!(
            ErrorKind::NotFound,
            ErrorKind::from_code(
                Some("ValidationError"),
                Some("AutoScalingGroup name not found - AutoScalingGroup nc-asg not found")
            )
        );
        assert_eq!(
            ErrorKind::Other,
            ErrorKind::from_code(Some("ValidationError"), Some("MaxSize must be >= 0"))
        );
        assert_eq!(
            ErrorKind::AlreadyExists,
            ErrorKind::from_code(Some("EntityAlreadyExists"), None)
        );
        assert_eq!(
            ErrorKind::DependencyViolation,
            ErrorKind::from_code(Some("DependencyViolation"), Some("resource sg-1 has a dependent object"))
        );
        assert_eq!(
            ErrorKind::Propagation,
            ErrorKind::from_code(
                Some("InvalidParameterValueException"),
                Some("The role defined for the function cannot be assumed by Lambda.")
            )
        );
        assert_eq!(
            ErrorKind::NotFound,
            ErrorKind::from_code(
                Some("InvalidParameterValue"),
                Some("No Environment found for EnvironmentName = 'nc-env'.")
            )
        );
        assert_eq!(
            ErrorKind::Other,
            ErrorKind::from_code(Some("InvalidParameterValue"), Some("Invalid solution stack"))
        );
        assert_eq!(
            ErrorKind::NotFound,
            ErrorKind::from_code(Some("WAFNonexistentItemException"), None)
        );
        assert_eq!(
            ErrorKind::DependencyViolation,
            ErrorKind::from_code(Some("WAFOptimisticLockException"), None)
        );
        assert_eq!(ErrorKind::Other, ErrorKind::from_code(None, None));
        assert_eq!(ErrorKind::Other, ErrorKind::from_code(Some("AccessDenied"), None));
    }

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Throttled.is_retryable());
        assert!(ErrorKind::DependencyViolation.is_retryable());
        assert!(ErrorKind::Propagation.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Other.is_retryable());
    }

    #[test]
    fn not_found_becomes_none() {
        let err = |kind| AwsError {
            kind,
            operation: "DeleteTable".into(),
            code: None,
            message: String::new(),
        };
        let gone: Result<(), AwsError> = Err(err(ErrorKind::NotFound));
        assert_eq!(None, gone.or_not_found().unwrap());
        let denied: Result<(), AwsError> = Err(err(ErrorKind::Other));
        assert!(denied.or_not_found().is_err());
    }
}
