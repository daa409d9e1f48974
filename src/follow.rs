use bevy::prelude::*;

/// The cell the host camera/UI is following
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FollowTarget {
    pub entity: Option<Entity>,
}

impl FollowTarget {
    /// Move to `next` (the killer, or any survivor) and report the new target
    pub fn retarget(&mut self, next: Option<Entity>) -> Option<Entity> {
        self.entity = next;
        next
    }

    pub fn is_following(&self, entity: Entity) -> bool {
        self.entity == Some(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retarget_replaces_and_reports() {
        let dead = Entity::from_raw(1);
        let killer = Entity::from_raw(2);
        let mut follow = FollowTarget { entity: Some(dead) };
        assert!(follow.is_following(dead));
        assert_eq!(follow.retarget(Some(killer)), Some(killer));
        assert!(follow.is_following(killer));
        assert_eq!(follow.retarget(None), None);
        assert_eq!(follow.entity, None);
    }
}
