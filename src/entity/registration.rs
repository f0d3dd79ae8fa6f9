use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "t_registration")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub event_id: i32,
    pub user_id: Option<i32>,
    pub name: String,
    pub email: String,
    pub mobile: String,
    pub course: String,
    pub branch: String,
    pub timestamp: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::event::Entity",
        from = "Column::EventId",
        to = "super::event::Column::Id",
        on_delete = "Cascade"
    )]
    Event,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "SetNull"
    )]
    User,
}

impl Related<super::event::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Event.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Who a registration belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Guest,
    Owned(i32),
}

impl Owner {
    pub fn user_id(self) -> Option<i32> {
        match self {
            Owner::Guest => None,
            Owner::Owned(id) => Some(id),
        }
    }
}

impl From<Option<i32>> for Owner {
    fn from(user_id: Option<i32>) -> Self {
        user_id.map_or(Owner::Guest, Owner::Owned)
    }
}

impl Model {
    pub fn owner(&self) -> Owner {
        Owner::from(self.user_id)
    }
}
